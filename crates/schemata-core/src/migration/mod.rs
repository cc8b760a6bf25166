//! Migration engine.
//!
//! This module turns snapshot pairs into migrations and runs them:
//! - Snapshot diffing into ordered, invertible operations
//! - Safety grading (A/B/C/D), for flagging only
//! - Migration artifacts on disk
//! - Planning against a target's ledger
//! - Ledger-tracked execution with transactional and compensating failure modes
//!
//! # Safety Grades
//!
//! | Grade | Description | Examples |
//! |-------|-------------|----------|
//! | **A** | Additive, non-breaking | New tables, new nullable columns |
//! | **B** | Needs defaults or a scan | Required columns with defaults, new indexes |
//! | **C** | Breaking but data-preserving | Renames, primary key changes, widening alters |
//! | **D** | Destructive | Dropped tables or columns, narrowing alters |
//!
//! # Example
//!
//! ```ignore
//! use schemata_core::migration::{Migration, Planner, RenameHints, SchemaDiff};
//!
//! let outcome = SchemaDiff::compute(&before, &after, &RenameHints::new())?;
//! let migration = Migration::from_diff(store.next_id()?, "add address", outcome.accept()?);
//! store.save(&migration)?;
//!
//! let planner = Planner::new(store.load_all()?)?;
//! let plan = planner.plan_forward(target.id(), &ledger.entries(target.id())?, None)?;
//! let report = executor.execute(&target, &plan, &CancellationToken::new());
//! ```

pub mod artifact;
pub mod cancel;
pub mod definition;
pub mod diff;
pub mod error;
pub mod executor;
pub mod grader;
pub mod id;
pub mod operation;
pub mod planner;
pub mod state;

// Re-export main types

// Operation types
pub use operation::{invert_all, Operation};

// Identity types
pub use id::{current_timestamp, MigrationId, ParseMigrationIdError, MIGRATION_ID_KEY_LEN};

// Diff types
pub use diff::{DiffOutcome, DiffWarning, RenameHints, SchemaDiff};

// Error types
pub use error::{MigrationError, SafetyGrade};

// Grader types
pub use grader::{ChangeGrade, MigrationGrade, SafetyGrader};

// Definition and artifact types
pub use artifact::MigrationStore;
pub use definition::{Migration, CHECKSUM_LEN};

// Planner types
pub use planner::{Direction, MigrationStatus, Plan, Planner, StatusRow};

// Executor types
pub use cancel::CancellationToken;
pub use executor::MigrationExecutor;
pub use state::{ExecutorState, PlanReport};
