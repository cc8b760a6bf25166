//! Executor configuration.

use std::time::Duration;

/// Default wait for a target connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait for another plan on the same target to finish.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the migration executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How long to wait for a target connection.
    pub acquire_timeout: Duration,

    /// How long to wait for the per-target lock inside one executor.
    pub lock_timeout: Duration,

    /// Refuse to revert a migration whose checksum differs from the ledger record.
    pub verify_checksums: bool,

    /// Undo already-executed operations when a migration fails on a target
    /// without transactional DDL.
    pub compensate_on_failure: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            verify_checksums: true,
            compensate_on_failure: true,
        }
    }
}

impl ExecutorConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection acquisition timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the per-target lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Enable or disable checksum verification.
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Enable or disable compensation on non-transactional targets.
    pub fn with_compensation(mut self, compensate: bool) -> Self {
        self.compensate_on_failure = compensate;
        self
    }
}
