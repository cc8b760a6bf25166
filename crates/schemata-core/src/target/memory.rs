//! In-memory reference target.
//!
//! Keeps its live schema as a [`SchemaModel`]. Transactional DDL can be
//! switched off, and failures can be injected at a chosen operation, on a
//! chosen table, or at commit, which makes it the test double for every
//! executor failure path.

use super::slot::{ConnectionSlot, SlotPermit};
use super::{StructuralTarget, TargetConnection, TargetError};
use crate::migration::Operation;
use crate::snapshot::SchemaModel;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Faults {
    /// Number of operations to let through before one fails.
    fail_after: Option<usize>,
    fail_on_table: Option<String>,
    fail_next_commit: bool,
}

struct Shared {
    model: Mutex<SchemaModel>,
    faults: Mutex<Faults>,
    log: Mutex<Vec<Operation>>,
    acquisitions: AtomicUsize,
}

/// In-memory structural target.
///
/// Clones share the same schema, log and fault configuration.
#[derive(Clone)]
pub struct MemoryTarget {
    id: String,
    transactional: bool,
    slot: ConnectionSlot,
    shared: Arc<Shared>,
}

impl MemoryTarget {
    /// An empty target with transactional DDL.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transactional: true,
            slot: ConnectionSlot::new(),
            shared: Arc::new(Shared {
                model: Mutex::new(SchemaModel::new()),
                faults: Mutex::new(Faults::default()),
                log: Mutex::new(Vec::new()),
                acquisitions: AtomicUsize::new(0),
            }),
        }
    }

    /// An empty target where every operation takes effect immediately.
    pub fn non_transactional(id: impl Into<String>) -> Self {
        Self {
            transactional: false,
            ..Self::new(id)
        }
    }

    /// Replace the live schema.
    pub fn with_model(self, model: SchemaModel) -> Self {
        *self.shared.model.lock() = model;
        self
    }

    /// Copy of the live (committed) schema.
    pub fn model(&self) -> SchemaModel {
        self.shared.model.lock().clone()
    }

    /// Every operation that executed successfully, in order.
    pub fn executed(&self) -> Vec<Operation> {
        self.shared.log.lock().clone()
    }

    /// Number of connections handed out so far.
    pub fn acquisitions(&self) -> usize {
        self.shared.acquisitions.load(Ordering::SeqCst)
    }

    /// Fail the operation after the next `n` successful ones. One-shot.
    pub fn fail_at_operation(&self, n: usize) {
        self.shared.faults.lock().fail_after = Some(n);
    }

    /// Fail every operation on `table` until faults are cleared.
    pub fn fail_on_table(&self, table: impl Into<String>) {
        self.shared.faults.lock().fail_on_table = Some(table.into());
    }

    /// Fail the next commit. One-shot.
    pub fn fail_next_commit(&self) {
        self.shared.faults.lock().fail_next_commit = true;
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        *self.shared.faults.lock() = Faults::default();
    }

    /// Hold the only connection slot, starving other acquirers.
    pub fn hold_connection(&self) -> Option<SlotPermit> {
        self.slot.acquire(Duration::ZERO)
    }
}

impl StructuralTarget for MemoryTarget {
    type Connection = MemoryConnection;

    fn id(&self) -> &str {
        &self.id
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.transactional
    }

    fn acquire(&self, timeout: Duration) -> Result<MemoryConnection, TargetError> {
        let permit = self
            .slot
            .acquire(timeout)
            .ok_or_else(|| TargetError::AcquireTimeout {
                target: self.id.clone(),
                timeout,
            })?;
        self.shared.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            _permit: permit,
            shared: Arc::clone(&self.shared),
            transactional: self.transactional,
            staged: None,
        })
    }
}

/// Connection to a [`MemoryTarget`].
pub struct MemoryConnection {
    _permit: SlotPermit,
    shared: Arc<Shared>,
    transactional: bool,
    staged: Option<SchemaModel>,
}

impl MemoryConnection {
    fn check_faults(&self, operation: &Operation) -> Result<(), TargetError> {
        let mut faults = self.shared.faults.lock();
        if let Some(remaining) = faults.fail_after {
            if remaining == 0 {
                faults.fail_after = None;
                return Err(TargetError::rejected(operation, "injected failure"));
            }
            faults.fail_after = Some(remaining - 1);
        }
        if faults.fail_on_table.as_deref() == Some(operation.table()) {
            return Err(TargetError::rejected(operation, "injected table failure"));
        }
        Ok(())
    }
}

impl TargetConnection for MemoryConnection {
    fn begin(&mut self) -> Result<(), TargetError> {
        if self.transactional {
            self.staged = Some(self.shared.model.lock().clone());
        }
        Ok(())
    }

    fn execute(&mut self, operation: &Operation) -> Result<(), TargetError> {
        self.check_faults(operation)?;
        let result = match self.staged.as_mut() {
            Some(staged) => staged.apply(operation),
            None => self.shared.model.lock().apply(operation),
        };
        result.map_err(|e| TargetError::rejected(operation, e))?;
        self.shared.log.lock().push(operation.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TargetError> {
        let Some(staged) = self.staged.take() else {
            return Ok(());
        };
        {
            let mut faults = self.shared.faults.lock();
            if faults.fail_next_commit {
                faults.fail_next_commit = false;
                return Err(TargetError::Transaction("injected commit failure".into()));
            }
        }
        *self.shared.model.lock() = staged;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), TargetError> {
        self.staged = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ColumnDef, DataType, TableDef};

    fn create(name: &str) -> Operation {
        Operation::CreateTable {
            table: TableDef::new(name).with_column(ColumnDef::new("id", DataType::integer())),
        }
    }

    #[test]
    fn test_transactional_rollback_discards_changes() {
        let target = MemoryTarget::new("mem");
        let mut conn = target.acquire(Duration::from_millis(10)).unwrap();

        conn.begin().unwrap();
        conn.execute(&create("A")).unwrap();
        assert!(target.model().table("A").is_none());
        conn.rollback().unwrap();
        assert!(target.model().tables().is_empty());

        conn.begin().unwrap();
        conn.execute(&create("B")).unwrap();
        conn.commit().unwrap();
        assert!(target.model().table("B").is_some());
    }

    #[test]
    fn test_non_transactional_applies_immediately() {
        let target = MemoryTarget::non_transactional("mem");
        let mut conn = target.acquire(Duration::from_millis(10)).unwrap();

        conn.begin().unwrap();
        conn.execute(&create("A")).unwrap();
        conn.rollback().unwrap();

        assert!(target.model().table("A").is_some());
        assert!(!target.supports_transactional_ddl());
    }

    #[test]
    fn test_fail_at_operation_is_one_shot() {
        let target = MemoryTarget::non_transactional("mem");
        target.fail_at_operation(1);
        let mut conn = target.acquire(Duration::from_millis(10)).unwrap();

        conn.execute(&create("A")).unwrap();
        assert!(conn.execute(&create("B")).is_err());
        conn.execute(&create("C")).unwrap();

        assert_eq!(target.executed().len(), 2);
    }

    #[test]
    fn test_fail_on_table() {
        let target = MemoryTarget::new("mem");
        target.fail_on_table("Bad");
        let mut conn = target.acquire(Duration::from_millis(10)).unwrap();

        assert!(conn.execute(&create("Bad")).is_err());
        conn.execute(&create("Good")).unwrap();

        target.clear_faults();
        conn.execute(&create("Bad")).unwrap();
    }

    #[test]
    fn test_commit_failure_keeps_model() {
        let target = MemoryTarget::new("mem");
        target.fail_next_commit();
        let mut conn = target.acquire(Duration::from_millis(10)).unwrap();

        conn.begin().unwrap();
        conn.execute(&create("A")).unwrap();
        assert!(matches!(conn.commit(), Err(TargetError::Transaction(_))));
        assert!(target.model().tables().is_empty());
    }

    #[test]
    fn test_acquire_times_out_while_held() {
        let target = MemoryTarget::new("mem");
        let _held = target.hold_connection().unwrap();

        let result = target.acquire(Duration::from_millis(20));
        assert!(matches!(result, Err(TargetError::AcquireTimeout { .. })));
        assert_eq!(target.acquisitions(), 0);
    }

    #[test]
    fn test_operation_rejected_by_model() {
        let target = MemoryTarget::new("mem");
        let mut conn = target.acquire(Duration::from_millis(10)).unwrap();

        conn.execute(&create("A")).unwrap();
        let err = conn.execute(&create("A")).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
