//! Structural-change collaborators.
//!
//! The executor never runs DDL itself. It acquires a [`TargetConnection`]
//! from a [`StructuralTarget`] and hands it one [`Operation`] at a time.
//! Whether a group of operations can be rolled back as a unit is a
//! capability of the target, reported by
//! [`StructuralTarget::supports_transactional_ddl`].

mod memory;
mod sled_target;
mod slot;

pub use memory::{MemoryConnection, MemoryTarget};
pub use sled_target::{SledConnection, SledTarget};
pub use slot::{ConnectionSlot, SlotPermit};

use crate::migration::{MigrationError, Operation};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a structural-change collaborator.
#[derive(Debug, Error)]
pub enum TargetError {
    /// No connection became available in time.
    #[error("timed out after {timeout:?} waiting for a connection to `{target}`")]
    AcquireTimeout {
        /// Target identifier.
        target: String,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The target rejected an operation.
    #[error("`{operation}` rejected: {reason}")]
    Operation {
        /// Description of the operation.
        operation: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Begin, commit or rollback failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),

    /// The ledger refused the record after every operation had run.
    #[error("ledger update failed: {0}")]
    Ledger(#[source] Box<MigrationError>),
}

impl TargetError {
    /// Rejection of `operation` for `reason`.
    pub fn rejected(operation: &Operation, reason: impl ToString) -> Self {
        TargetError::Operation {
            operation: operation.describe(),
            reason: reason.to_string(),
        }
    }
}

/// A live schema instance migrations are applied to.
pub trait StructuralTarget: Send + Sync {
    /// Connection type handed out by [`StructuralTarget::acquire`].
    type Connection: TargetConnection;

    /// Stable identifier; the ledger is keyed by it.
    fn id(&self) -> &str;

    /// Whether several operations can be grouped into one atomic unit.
    fn supports_transactional_ddl(&self) -> bool;

    /// Acquire a connection, waiting at most `timeout`.
    fn acquire(&self, timeout: Duration) -> Result<Self::Connection, TargetError>;
}

/// A connection able to run structural operations.
///
/// On targets without transactional DDL, `begin`, `commit` and `rollback`
/// are accepted but every `execute` takes effect immediately.
pub trait TargetConnection {
    /// Start a unit of work.
    fn begin(&mut self) -> Result<(), TargetError>;

    /// Run one structural operation.
    fn execute(&mut self, operation: &Operation) -> Result<(), TargetError>;

    /// Make the unit of work durable.
    fn commit(&mut self) -> Result<(), TargetError>;

    /// Discard the unit of work.
    fn rollback(&mut self) -> Result<(), TargetError>;
}

/// A begun unit of work on a connection.
///
/// Rolled back on drop unless [`UnitOfWork::commit`] or
/// [`UnitOfWork::rollback`] consumed it first, so every exit path releases
/// the transaction.
pub struct UnitOfWork<'c, C: TargetConnection> {
    connection: &'c mut C,
    finished: bool,
}

impl<'c, C: TargetConnection> UnitOfWork<'c, C> {
    /// Begin a unit of work on `connection`.
    pub fn begin(connection: &'c mut C) -> Result<Self, TargetError> {
        connection.begin()?;
        Ok(Self {
            connection,
            finished: false,
        })
    }

    /// Run one operation inside the unit of work.
    pub fn execute(&mut self, operation: &Operation) -> Result<(), TargetError> {
        self.connection.execute(operation)
    }

    /// Commit and consume the unit of work.
    pub fn commit(mut self) -> Result<(), TargetError> {
        self.finished = true;
        self.connection.commit()
    }

    /// Roll back and consume the unit of work.
    pub fn rollback(mut self) -> Result<(), TargetError> {
        self.finished = true;
        self.connection.rollback()
    }
}

impl<C: TargetConnection> Drop for UnitOfWork<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.connection.rollback() {
                tracing::warn!(error = %e, "rollback of abandoned unit of work failed");
            }
        }
    }
}
