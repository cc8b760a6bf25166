//! CLI error type and exit codes.

use schemata_core::MigrationError;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for errors in how the CLI was invoked.
pub const EXIT_USAGE: i32 = 2;

/// Exit code for failures while running against the target.
pub const EXIT_RUNTIME: i32 = 3;

/// Exit code for everything else.
pub const EXIT_OTHER: i32 = 1;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Engine error.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// An input file could not be read or parsed.
    #[error("cannot read `{path}`: {reason}")]
    InvalidInput {
        /// File concerned.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// A `--rename` value is malformed.
    #[error("invalid rename `{0}`: expected TABLE.OLD=NEW")]
    InvalidRename(String),

    /// The new snapshot matches the latest one.
    #[error("no structural changes since the latest snapshot; pass --allow-empty to save anyway")]
    NoChanges,

    /// The plan contains grade-D operations.
    #[error("plan contains destructive changes: {changes}; pass --allow-destructive to apply")]
    DestructivePlan {
        /// Descriptions of the destructive operations.
        changes: String,
    },
}

impl CliError {
    /// Error kind printed in `error[<kind>]`.
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Migration(e) => e.kind(),
            CliError::InvalidInput { .. } => "InvalidInput",
            CliError::InvalidRename(_) => "InvalidRenameHint",
            CliError::NoChanges => "NoChanges",
            CliError::DestructivePlan { .. } => "DestructivePlan",
        }
    }

    /// Process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Migration(e) if e.is_usage_error() => EXIT_USAGE,
            CliError::Migration(e) if e.is_runtime_failure() => EXIT_RUNTIME,
            CliError::Migration(_) => EXIT_OTHER,
            _ => EXIT_USAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata_core::MigrationId;

    #[test]
    fn test_exit_codes() {
        let usage = CliError::from(MigrationError::NotLatestMigration {
            target: "prod".into(),
            migration_id: MigrationId::new(1, 0),
            latest: Some(MigrationId::new(2, 0)),
        });
        assert_eq!(usage.kind(), "NotLatestMigration");
        assert_eq!(usage.exit_code(), EXIT_USAGE);

        let busy = CliError::from(MigrationError::TargetBusy {
            target: "prod".into(),
        });
        assert_eq!(busy.exit_code(), EXIT_RUNTIME);

        let storage = CliError::from(MigrationError::Storage(schemata_core::Error::InvalidKey));
        assert_eq!(storage.exit_code(), EXIT_OTHER);

        assert_eq!(CliError::NoChanges.exit_code(), EXIT_USAGE);
    }
}
