//! Migration-specific error types.

use super::diff::DiffWarning;
use super::id::MigrationId;
use crate::snapshot::SnapshotError;
use crate::target::TargetError;
use thiserror::Error;

/// Safety grade for a structural operation or a whole migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SafetyGrade {
    /// Grade A: purely additive.
    /// Examples: new tables, new nullable columns, new non-unique indexes.
    A,
    /// Grade B: additive but existing rows need a value or a scan.
    /// Examples: required columns with defaults, unique indexes.
    B,
    /// Grade C: breaking for readers but data-preserving.
    /// Examples: renames, primary key changes, widening type changes.
    C,
    /// Grade D: destructive, may lose data.
    /// Examples: dropped tables or columns, narrowing type changes.
    D,
}

impl std::fmt::Display for SafetyGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyGrade::A => write!(f, "A (additive)"),
            SafetyGrade::B => write!(f, "B (needs defaults)"),
            SafetyGrade::C => write!(f, "C (breaking, data-preserving)"),
            SafetyGrade::D => write!(f, "D (destructive)"),
        }
    }
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A snapshot failed structural validation.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotError),

    /// The diff carries warnings the caller has not acknowledged.
    #[error("diff needs acknowledgement: {}", join_warnings(.warnings))]
    IncompatibleDiff {
        /// Unacknowledged warnings.
        warnings: Vec<DiffWarning>,
    },

    /// A rename hint does not describe a rename between the two snapshots.
    #[error("invalid rename hint {table}.{from} -> {to}: {reason}")]
    InvalidRenameHint {
        /// Table the hint applies to.
        table: String,
        /// Old column name.
        from: String,
        /// New column name.
        to: String,
        /// Why the hint was rejected.
        reason: String,
    },

    /// A migration was recorded after a later one.
    #[error("cannot record {migration_id} on `{target}`: {last_applied} is already applied")]
    OutOfOrderApplication {
        /// Target identifier.
        target: String,
        /// Migration being recorded.
        migration_id: MigrationId,
        /// Most recent applied migration.
        last_applied: MigrationId,
    },

    /// A revert named something other than the most recently applied migration.
    #[error("cannot revert {migration_id} on `{target}`: latest applied is {}", display_latest(.latest))]
    NotLatestMigration {
        /// Target identifier.
        target: String,
        /// Migration the caller tried to revert.
        migration_id: MigrationId,
        /// Most recent applied migration.
        latest: Option<MigrationId>,
    },

    /// A rollback target is not part of the applied prefix.
    #[error("rollback target {migration_id} is not applied on `{target}`")]
    UnknownRollbackTarget {
        /// Target identifier.
        target: String,
        /// Requested rollback target.
        migration_id: MigrationId,
    },

    /// Re-applying an applied migration, or reverting one that never ran.
    #[error("invalid transition for {migration_id} on `{target}`: {reason}")]
    InvalidTransition {
        /// Target identifier.
        target: String,
        /// Migration concerned.
        migration_id: MigrationId,
        /// What made the transition invalid.
        reason: String,
    },

    /// An operation failed and the target rolled the migration back.
    #[error("migration {migration_id} failed at operation {failed_operation_index}: {cause}")]
    MigrationFailed {
        /// Migration that failed.
        migration_id: MigrationId,
        /// Zero-based index of the failing operation.
        failed_operation_index: usize,
        /// Collaborator failure.
        cause: TargetError,
    },

    /// An operation failed on a target without transactional DDL.
    ///
    /// `compensated` operations were undone; `residual` remain applied.
    /// `failed_operation_index` equals the operation count when every
    /// operation ran and the ledger record failed.
    #[error(
        "migration {migration_id} partially applied: operation {failed_operation_index} failed ({cause}); \
         {compensated} undone, {residual} left in place"
    )]
    PartiallyApplied {
        /// Migration that failed.
        migration_id: MigrationId,
        /// Zero-based index of the failing operation.
        failed_operation_index: usize,
        /// Collaborator failure.
        cause: TargetError,
        /// Operations successfully reversed.
        compensated: usize,
        /// Operations still applied after compensation.
        residual: usize,
    },

    /// A migration id is not in the known list.
    #[error("unknown migration {migration_id}")]
    UnknownMigration {
        /// The unknown id.
        migration_id: MigrationId,
    },

    /// Two migrations share an id.
    #[error("duplicate migration {migration_id}")]
    DuplicateMigration {
        /// The repeated id.
        migration_id: MigrationId,
    },

    /// The known migration list is not in ascending id order.
    #[error("migrations out of order: {next} follows {previous}")]
    UnorderedMigrations {
        /// Earlier entry in the list.
        previous: MigrationId,
        /// Entry that should have come first.
        next: MigrationId,
    },

    /// The applied set is not a prefix of the known migrations.
    #[error("ledger does not form a prefix: expected {expected} at position {position}, found {found}")]
    PlanGap {
        /// Position in the ordered sequence.
        position: usize,
        /// Known migration at that position.
        expected: MigrationId,
        /// Applied migration at that position.
        found: MigrationId,
    },

    /// A known migration changed after it was applied.
    #[error("migration {migration_id} was modified after it was applied")]
    ChecksumMismatch {
        /// Migration concerned.
        migration_id: MigrationId,
    },

    /// No connection to the target could be acquired.
    #[error("target `{target}` unavailable: {cause}")]
    TargetUnavailable {
        /// Target identifier.
        target: String,
        /// Collaborator failure.
        cause: TargetError,
    },

    /// Another plan is running against the target in this executor.
    #[error("target `{target}` is busy")]
    TargetBusy {
        /// Target identifier.
        target: String,
    },

    /// The target refused to commit; the ledger record was withdrawn.
    #[error("commit of {migration_id} failed: {cause}")]
    CommitFailed {
        /// Migration concerned.
        migration_id: MigrationId,
        /// Collaborator failure.
        cause: TargetError,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

impl MigrationError {
    /// Stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::InvalidSnapshot(_) => "InvalidSnapshot",
            MigrationError::IncompatibleDiff { .. } => "IncompatibleDiff",
            MigrationError::InvalidRenameHint { .. } => "InvalidRenameHint",
            MigrationError::OutOfOrderApplication { .. } => "OutOfOrderApplication",
            MigrationError::NotLatestMigration { .. } => "NotLatestMigration",
            MigrationError::UnknownRollbackTarget { .. } => "UnknownRollbackTarget",
            MigrationError::InvalidTransition { .. } => "InvalidTransition",
            MigrationError::MigrationFailed { .. } => "MigrationFailed",
            MigrationError::PartiallyApplied { .. } => "PartiallyApplied",
            MigrationError::UnknownMigration { .. } => "UnknownMigration",
            MigrationError::DuplicateMigration { .. } => "DuplicateMigration",
            MigrationError::UnorderedMigrations { .. } => "UnorderedMigrations",
            MigrationError::PlanGap { .. } => "PlanGap",
            MigrationError::ChecksumMismatch { .. } => "ChecksumMismatch",
            MigrationError::TargetUnavailable { .. } => "TargetUnavailable",
            MigrationError::TargetBusy { .. } => "TargetBusy",
            MigrationError::CommitFailed { .. } => "CommitFailed",
            MigrationError::Storage(_) => "Storage",
        }
    }

    /// Errors caused by how the engine was called; nothing touched the target.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            MigrationError::InvalidSnapshot(_)
                | MigrationError::IncompatibleDiff { .. }
                | MigrationError::InvalidRenameHint { .. }
                | MigrationError::OutOfOrderApplication { .. }
                | MigrationError::NotLatestMigration { .. }
                | MigrationError::UnknownRollbackTarget { .. }
                | MigrationError::InvalidTransition { .. }
                | MigrationError::UnknownMigration { .. }
                | MigrationError::DuplicateMigration { .. }
                | MigrationError::UnorderedMigrations { .. }
                | MigrationError::PlanGap { .. }
                | MigrationError::ChecksumMismatch { .. }
        )
    }

    /// Failures while running against the target.
    pub fn is_runtime_failure(&self) -> bool {
        matches!(
            self,
            MigrationError::MigrationFailed { .. }
                | MigrationError::PartiallyApplied { .. }
                | MigrationError::TargetUnavailable { .. }
                | MigrationError::TargetBusy { .. }
                | MigrationError::CommitFailed { .. }
        )
    }
}

fn join_warnings(warnings: &[DiffWarning]) -> String {
    warnings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn display_latest(latest: &Option<MigrationId>) -> String {
    match latest {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}
