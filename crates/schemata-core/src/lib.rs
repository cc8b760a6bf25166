//! Schemata Core - snapshot diffing, migration planning and ledger-tracked execution.
//!
//! This crate provides the structural schema migration engine behind the
//! `schemata` CLI. It never issues data-manipulation statements; row data
//! is the concern of whatever [`target::StructuralTarget`] it drives.

pub mod config;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod snapshot;
pub mod target;

pub use config::ExecutorConfig;
pub use error::Error;
pub use ledger::{HistoryLedger, LedgerEntry, MemoryLedger, SledLedger};
pub use migration::{
    CancellationToken, DiffOutcome, Direction, ExecutorState, Migration, MigrationError,
    MigrationExecutor, MigrationGrade, MigrationId, MigrationStore, Operation, Plan, PlanReport,
    Planner, RenameHints, SafetyGrade, SafetyGrader, SchemaDiff,
};
pub use snapshot::{ColumnDef, DataType, DefaultValue, IndexDef, SchemaModel, Snapshot, TableDef};
pub use target::{MemoryTarget, SledTarget, StructuralTarget, TargetConnection, TargetError};
