//! In-memory ledger for tests and dry runs.

use super::{check_append, check_revert, HistoryLedger, LedgerEntry};
use crate::migration::{MigrationError, MigrationId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Ledger kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    targets: RwLock<HashMap<String, Vec<LedgerEntry>>>,
}

impl MemoryLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryLedger for MemoryLedger {
    fn entries(&self, target: &str) -> Result<Vec<LedgerEntry>, MigrationError> {
        Ok(self.targets.read().get(target).cloned().unwrap_or_default())
    }

    fn record_applied(&self, target: &str, entry: LedgerEntry) -> Result<(), MigrationError> {
        let mut targets = self.targets.write();
        let entries = targets.entry(target.to_string()).or_default();
        check_append(target, entries.last().map(|e| e.migration_id), entry.migration_id)?;
        entries.push(entry);
        Ok(())
    }

    fn record_reverted(
        &self,
        target: &str,
        id: MigrationId,
    ) -> Result<LedgerEntry, MigrationError> {
        let mut targets = self.targets.write();
        let ids: Vec<MigrationId> = targets
            .get(target)
            .map(|entries| entries.iter().map(|e| e.migration_id).collect())
            .unwrap_or_default();
        check_revert(target, &ids, id)?;

        let entries = targets.get_mut(target).ok_or_else(|| not_applied(target, id))?;
        let removed = entries.pop().ok_or_else(|| not_applied(target, id))?;
        if entries.is_empty() {
            targets.remove(target);
        }
        Ok(removed)
    }

    fn targets(&self) -> Result<Vec<String>, MigrationError> {
        Ok(self.targets.read().keys().cloned().collect())
    }
}

fn not_applied(target: &str, id: MigrationId) -> MigrationError {
    MigrationError::InvalidTransition {
        target: target.to_string(),
        migration_id: id,
        reason: "migration is not applied".to_string(),
    }
}
