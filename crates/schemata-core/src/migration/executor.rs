//! Migration executor - runs migrations against a target.
//!
//! Each migration runs inside one unit of work on one connection. The
//! ledger is updated after the last operation succeeds and before the unit
//! of work commits, so a failure at any step leaves ledger and target in
//! agreement:
//!
//! - operation failure: the unit of work rolls back and the ledger is
//!   untouched (`MigrationFailed`). Targets without transactional DDL get
//!   the inverses of the executed operations instead (`PartiallyApplied`).
//! - ledger failure: the unit of work rolls back.
//! - commit failure: the ledger record is withdrawn (`CommitFailed`).

use super::cancel::CancellationToken;
use super::definition::Migration;
use super::error::MigrationError;
use super::id::MigrationId;
use super::operation::Operation;
use super::planner::{Direction, Plan};
use super::state::{ExecutorState, PlanReport};
use crate::config::ExecutorConfig;
use crate::ledger::{check_append, check_revert, HistoryLedger, LedgerEntry};
use crate::target::{StructuralTarget, TargetConnection, TargetError, UnitOfWork};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Per-target serialization point and observable state.
#[derive(Default)]
struct TargetSlot {
    run: Mutex<()>,
    state: Mutex<ExecutorState>,
}

impl TargetSlot {
    fn set(&self, state: ExecutorState) {
        *self.state.lock() = state;
    }
}

/// What running one migration amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Executed,
    NoOp,
}

/// Runs migrations against structural targets and keeps the ledger in step.
pub struct MigrationExecutor<L: HistoryLedger> {
    ledger: Arc<L>,
    config: ExecutorConfig,
    slots: DashMap<String, Arc<TargetSlot>>,
}

impl<L: HistoryLedger> MigrationExecutor<L> {
    /// Create an executor over `ledger`.
    pub fn new(ledger: Arc<L>, config: ExecutorConfig) -> Self {
        Self {
            ledger,
            config,
            slots: DashMap::new(),
        }
    }

    /// The ledger this executor records into.
    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// The executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Current state for `target_id`. `Idle` for targets never touched.
    pub fn state(&self, target_id: &str) -> ExecutorState {
        self.slots
            .get(target_id)
            .map(|slot| *slot.state.lock())
            .unwrap_or_default()
    }

    /// Apply one migration's `up_ops`.
    pub fn apply<T: StructuralTarget>(
        &self,
        target: &T,
        migration: &Migration,
    ) -> Result<(), MigrationError> {
        let slot = self.slot(target.id());
        let _guard = self.lock(&slot, target.id())?;
        self.run_one(target, &slot, migration, Direction::Forward)
            .map(|_| ())
    }

    /// Revert one migration with its `down_ops`. It must be the latest applied.
    pub fn revert<T: StructuralTarget>(
        &self,
        target: &T,
        migration: &Migration,
    ) -> Result<(), MigrationError> {
        let slot = self.slot(target.id());
        let _guard = self.lock(&slot, target.id())?;
        self.run_one(target, &slot, migration, Direction::Backward)
            .map(|_| ())
    }

    /// Apply every migration in `migrations` newer than the target's head.
    ///
    /// Migrations at or below the head are skipped, so running the same list
    /// twice is a no-op the second time. Stops at the first failure.
    pub fn apply_plan<T: StructuralTarget>(
        &self,
        target: &T,
        migrations: &[Migration],
        cancel: &CancellationToken,
    ) -> PlanReport {
        let id = target.id();
        if let Err(e) = ensure_ascending(migrations) {
            return PlanReport::failed(id, Direction::Forward, e);
        }
        let slot = self.slot(id);
        let _guard = match self.lock(&slot, id) {
            Ok(guard) => guard,
            Err(e) => return PlanReport::failed(id, Direction::Forward, e),
        };

        let pending = match self.ledger.pending(id, migrations) {
            Ok(pending) => pending,
            Err(e) => return PlanReport::failed(id, Direction::Forward, e),
        };
        self.run_all(target, &slot, Direction::Forward, pending, cancel)
    }

    /// Revert the applied migrations in `migrations`, newest first.
    pub fn revert_plan<T: StructuralTarget>(
        &self,
        target: &T,
        migrations: &[Migration],
        cancel: &CancellationToken,
    ) -> PlanReport {
        let id = target.id();
        let slot = self.slot(id);
        let _guard = match self.lock(&slot, id) {
            Ok(guard) => guard,
            Err(e) => return PlanReport::failed(id, Direction::Backward, e),
        };

        let applied = match self.ledger.applied_ids(id) {
            Ok(applied) => applied,
            Err(e) => return PlanReport::failed(id, Direction::Backward, e),
        };
        let mut selected: Vec<&Migration> = migrations
            .iter()
            .filter(|m| applied.contains(&m.id))
            .collect();
        selected.sort_by(|a, b| b.id.cmp(&a.id));
        self.run_all(target, &slot, Direction::Backward, selected, cancel)
    }

    /// Run a plan computed by the planner.
    pub fn execute<T: StructuralTarget>(
        &self,
        target: &T,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> PlanReport {
        let id = target.id();
        if plan.target != id {
            let error = MigrationError::InvalidTransition {
                target: id.to_string(),
                migration_id: plan.ids().first().copied().unwrap_or_default(),
                reason: format!("plan was computed for `{}`", plan.target),
            };
            return PlanReport::failed(id, plan.direction, error);
        }

        let slot = self.slot(id);
        let _guard = match self.lock(&slot, id) {
            Ok(guard) => guard,
            Err(e) => return PlanReport::failed(id, plan.direction, e),
        };
        self.run_all(target, &slot, plan.direction, plan.migrations.iter().collect(), cancel)
    }

    fn slot(&self, target_id: &str) -> Arc<TargetSlot> {
        Arc::clone(&self.slots.entry(target_id.to_string()).or_default())
    }

    fn lock<'s>(
        &self,
        slot: &'s TargetSlot,
        target_id: &str,
    ) -> Result<MutexGuard<'s, ()>, MigrationError> {
        slot.run
            .try_lock_for(self.config.lock_timeout)
            .ok_or_else(|| MigrationError::TargetBusy {
                target: target_id.to_string(),
            })
    }

    fn run_all<T: StructuralTarget>(
        &self,
        target: &T,
        slot: &TargetSlot,
        direction: Direction,
        migrations: Vec<&Migration>,
        cancel: &CancellationToken,
    ) -> PlanReport {
        let mut report = PlanReport::new(target.id(), direction);
        for migration in migrations {
            if cancel.is_cancelled() {
                tracing::warn!(
                    target_id = %target.id(),
                    migration_id = %migration.id,
                    completed = report.succeeded(),
                    "plan cancelled before migration"
                );
                report.cancelled = true;
                break;
            }
            match self.run_one(target, slot, migration, direction) {
                Ok(outcome) => {
                    report.completed.push(migration.id);
                    if outcome == Outcome::NoOp {
                        report.skipped_no_ops += 1;
                    }
                }
                Err(e) => {
                    report.error = Some(e);
                    break;
                }
            }
        }
        report
    }

    fn run_one<T: StructuralTarget>(
        &self,
        target: &T,
        slot: &TargetSlot,
        migration: &Migration,
        direction: Direction,
    ) -> Result<Outcome, MigrationError> {
        slot.set(ExecutorState::Idle);
        let result = self
            .check_transition(target.id(), migration, direction)
            .and_then(|()| {
                slot.set(ExecutorState::Executing);
                self.run_checked(target, migration, direction)
            });

        match &result {
            Ok(_) => {
                slot.set(ExecutorState::Committed);
                tracing::info!(
                    target_id = %target.id(),
                    migration_id = %migration.id,
                    name = %migration.name,
                    direction = %direction,
                    "migration {}",
                    match direction {
                        Direction::Forward => "applied",
                        Direction::Backward => "reverted",
                    }
                );
            }
            Err(e) => {
                slot.set(ExecutorState::Failed);
                tracing::warn!(
                    target_id = %target.id(),
                    migration_id = %migration.id,
                    direction = %direction,
                    error = %e,
                    "migration failed"
                );
            }
        }
        result
    }

    /// Reject re-applies and out-of-order reverts before touching the target.
    fn check_transition(
        &self,
        target_id: &str,
        migration: &Migration,
        direction: Direction,
    ) -> Result<(), MigrationError> {
        let entries = self.ledger.entries(target_id)?;
        match direction {
            Direction::Forward => {
                if entries.iter().any(|e| e.migration_id == migration.id) {
                    return Err(MigrationError::InvalidTransition {
                        target: target_id.to_string(),
                        migration_id: migration.id,
                        reason: "migration is already applied".to_string(),
                    });
                }
                check_append(
                    target_id,
                    entries.last().map(|e| e.migration_id),
                    migration.id,
                )
            }
            Direction::Backward => {
                let ids: Vec<MigrationId> = entries.iter().map(|e| e.migration_id).collect();
                check_revert(target_id, &ids, migration.id)?;
                let recorded = entries.last().map(|e| e.checksum);
                if self.config.verify_checksums && recorded != Some(migration.checksum()) {
                    return Err(MigrationError::ChecksumMismatch {
                        migration_id: migration.id,
                    });
                }
                Ok(())
            }
        }
    }

    fn run_checked<T: StructuralTarget>(
        &self,
        target: &T,
        migration: &Migration,
        direction: Direction,
    ) -> Result<Outcome, MigrationError> {
        let operations = match direction {
            Direction::Forward => &migration.up_ops,
            Direction::Backward => &migration.down_ops,
        };

        // No-ops still move the ledger so the applied set stays a prefix.
        if operations.is_empty() {
            self.record(target.id(), migration, direction)?;
            return Ok(Outcome::NoOp);
        }

        let mut connection = target.acquire(self.config.acquire_timeout).map_err(|cause| {
            MigrationError::TargetUnavailable {
                target: target.id().to_string(),
                cause,
            }
        })?;
        let transactional = target.supports_transactional_ddl();
        let mut unit = UnitOfWork::begin(&mut connection).map_err(|cause| {
            MigrationError::MigrationFailed {
                migration_id: migration.id,
                failed_operation_index: 0,
                cause,
            }
        })?;

        for (index, operation) in operations.iter().enumerate() {
            if let Err(cause) = unit.execute(operation) {
                if transactional {
                    return Err(MigrationError::MigrationFailed {
                        migration_id: migration.id,
                        failed_operation_index: index,
                        cause,
                    });
                }
                return Err(self.compensate(
                    &mut unit,
                    target.id(),
                    migration.id,
                    &operations[..index],
                    index,
                    cause,
                ));
            }
            tracing::debug!(
                target_id = %target.id(),
                migration_id = %migration.id,
                operation_index = index,
                operation = %operation,
                "operation executed"
            );
        }

        // Dropping the unit rolls a transactional target back. Anything else
        // still carries every operation and is compensated like a failed one.
        let withdraw = match self.record(target.id(), migration, direction) {
            Ok(withdraw) => withdraw,
            Err(e) if transactional => return Err(e),
            Err(e) => {
                return Err(self.compensate(
                    &mut unit,
                    target.id(),
                    migration.id,
                    operations,
                    operations.len(),
                    TargetError::Ledger(Box::new(e)),
                ));
            }
        };

        if let Err(cause) = unit.commit() {
            if let Err(e) = self.withdraw(target.id(), migration.id, withdraw) {
                tracing::warn!(
                    target_id = %target.id(),
                    migration_id = %migration.id,
                    error = %e,
                    "could not withdraw ledger record after failed commit"
                );
            }
            return Err(MigrationError::CommitFailed {
                migration_id: migration.id,
                cause,
            });
        }
        Ok(Outcome::Executed)
    }

    /// Update the ledger. Returns what is needed to undo the update.
    fn record(
        &self,
        target_id: &str,
        migration: &Migration,
        direction: Direction,
    ) -> Result<Withdrawal, MigrationError> {
        match direction {
            Direction::Forward => {
                self.ledger
                    .record_applied(target_id, LedgerEntry::new(migration))?;
                Ok(Withdrawal::Applied)
            }
            Direction::Backward => {
                let entry = self.ledger.record_reverted(target_id, migration.id)?;
                Ok(Withdrawal::Reverted(entry))
            }
        }
    }

    fn withdraw(
        &self,
        target_id: &str,
        id: MigrationId,
        withdrawal: Withdrawal,
    ) -> Result<(), MigrationError> {
        match withdrawal {
            Withdrawal::Applied => self.ledger.record_reverted(target_id, id).map(|_| ()),
            Withdrawal::Reverted(entry) => self.ledger.record_applied(target_id, entry),
        }
    }

    /// Best-effort undo after a failure on a non-transactional target.
    fn compensate<C: TargetConnection>(
        &self,
        unit: &mut UnitOfWork<'_, C>,
        target_id: &str,
        migration_id: MigrationId,
        executed: &[Operation],
        failed_operation_index: usize,
        cause: TargetError,
    ) -> MigrationError {
        // Nothing took effect, so the target is exactly as it was.
        if executed.is_empty() {
            return MigrationError::MigrationFailed {
                migration_id,
                failed_operation_index,
                cause,
            };
        }

        let compensated = if self.config.compensate_on_failure {
            self.undo(unit, target_id, migration_id, executed)
        } else {
            0
        };
        MigrationError::PartiallyApplied {
            migration_id,
            failed_operation_index,
            cause,
            compensated,
            residual: executed.len() - compensated,
        }
    }

    /// Run the inverses of `executed` newest first. Stops at the first
    /// inverse that fails and returns how many succeeded.
    fn undo<C: TargetConnection>(
        &self,
        unit: &mut UnitOfWork<'_, C>,
        target_id: &str,
        migration_id: MigrationId,
        executed: &[Operation],
    ) -> usize {
        let mut compensated = 0;
        for (index, operation) in executed.iter().enumerate().rev() {
            let inverse = operation.inverse();
            match unit.execute(&inverse) {
                Ok(()) => compensated += 1,
                Err(e) => {
                    tracing::warn!(
                        target_id = %target_id,
                        migration_id = %migration_id,
                        operation_index = index,
                        error = %e,
                        "compensation stopped"
                    );
                    break;
                }
            }
        }
        tracing::warn!(
            target_id = %target_id,
            migration_id = %migration_id,
            compensated,
            residual = executed.len() - compensated,
            "compensated non-transactional failure"
        );
        compensated
    }
}

/// Undo information for a ledger update.
enum Withdrawal {
    Applied,
    Reverted(LedgerEntry),
}

fn ensure_ascending(migrations: &[Migration]) -> Result<(), MigrationError> {
    for pair in migrations.windows(2) {
        let (previous, next) = (pair[0].id, pair[1].id);
        if previous == next {
            return Err(MigrationError::DuplicateMigration { migration_id: next });
        }
        if previous > next {
            return Err(MigrationError::UnorderedMigrations { previous, next });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::snapshot::{ColumnDef, DataType, TableDef};
    use crate::target::MemoryTarget;
    use std::time::Duration;

    fn create(ts: u64, table: &str) -> Migration {
        let up = Operation::CreateTable {
            table: TableDef::new(table).with_column(ColumnDef::new("id", DataType::integer())),
        };
        let down = up.inverse();
        Migration::new(MigrationId::new(ts, 0), format!("create {}", table), vec![up], vec![down])
    }

    fn executor() -> MigrationExecutor<MemoryLedger> {
        MigrationExecutor::new(Arc::new(MemoryLedger::new()), ExecutorConfig::default())
    }

    fn create_both(ts: u64) -> Migration {
        let mut m = create(ts, "A");
        m.up_ops.extend(create(ts, "B").up_ops);
        m
    }

    /// Ledger whose writes always fail.
    #[derive(Default)]
    struct ReadOnlyLedger {
        inner: MemoryLedger,
    }

    impl HistoryLedger for ReadOnlyLedger {
        fn entries(&self, target: &str) -> Result<Vec<LedgerEntry>, MigrationError> {
            self.inner.entries(target)
        }

        fn record_applied(&self, _: &str, _: LedgerEntry) -> Result<(), MigrationError> {
            Err(MigrationError::Storage(crate::error::Error::InvalidKey))
        }

        fn record_reverted(&self, _: &str, _: MigrationId) -> Result<LedgerEntry, MigrationError> {
            Err(MigrationError::Storage(crate::error::Error::InvalidKey))
        }

        fn targets(&self) -> Result<Vec<String>, MigrationError> {
            self.inner.targets()
        }
    }

    fn read_only_executor() -> MigrationExecutor<ReadOnlyLedger> {
        MigrationExecutor::new(Arc::new(ReadOnlyLedger::default()), ExecutorConfig::default())
    }

    #[test]
    fn test_apply_then_revert() {
        let executor = executor();
        let target = MemoryTarget::new("mem");
        let m = create(1, "A");

        executor.apply(&target, &m).unwrap();
        assert!(target.model().table("A").is_some());
        assert_eq!(executor.ledger().applied_ids("mem").unwrap(), vec![m.id]);
        assert_eq!(executor.state("mem"), ExecutorState::Committed);

        executor.revert(&target, &m).unwrap();
        assert!(target.model().table("A").is_none());
        assert!(executor.ledger().applied_ids("mem").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_transitions_do_not_touch_target() {
        let executor = executor();
        let target = MemoryTarget::new("mem");
        let m = create(1, "A");

        let err = executor.revert(&target, &m).unwrap_err();
        assert_eq!(err.kind(), "InvalidTransition");
        assert_eq!(target.acquisitions(), 0);

        executor.apply(&target, &m).unwrap();
        let err = executor.apply(&target, &m).unwrap_err();
        assert_eq!(err.kind(), "InvalidTransition");
        assert_eq!(target.acquisitions(), 1);
        assert_eq!(executor.state("mem"), ExecutorState::Failed);
    }

    #[test]
    fn test_older_migration_is_out_of_order() {
        let executor = executor();
        let target = MemoryTarget::new("mem");

        executor.apply(&target, &create(2, "B")).unwrap();
        let err = executor.apply(&target, &create(1, "A")).unwrap_err();
        assert_eq!(err.kind(), "OutOfOrderApplication");
        assert!(target.model().table("A").is_none());
    }

    #[test]
    fn test_no_op_skips_connection() {
        let executor = executor();
        let target = MemoryTarget::new("mem");
        let empty = Migration::new(MigrationId::new(1, 0), "nothing", vec![], vec![]);

        let report = executor.apply_plan(&target, &[empty], &CancellationToken::new());

        assert!(report.is_success());
        assert_eq!(report.skipped_no_ops, 1);
        assert_eq!(target.acquisitions(), 0);
        assert_eq!(executor.ledger().applied_ids("mem").unwrap().len(), 1);
    }

    #[test]
    fn test_revert_rejects_modified_migration() {
        let executor = executor();
        let target = MemoryTarget::new("mem");
        let m = create(1, "A");
        executor.apply(&target, &m).unwrap();

        let edited = m.clone().with_overrides(m.up_ops.clone(), vec![]);
        let err = executor.revert(&target, &edited).unwrap_err();
        assert_eq!(err.kind(), "ChecksumMismatch");
        assert!(target.model().table("A").is_some());
    }

    #[test]
    fn test_busy_target() {
        let executor = MigrationExecutor::new(
            Arc::new(MemoryLedger::new()),
            ExecutorConfig::default().with_lock_timeout(Duration::from_millis(10)),
        );
        let target = MemoryTarget::new("mem");

        let slot = executor.slot("mem");
        let _held = slot.run.lock();

        let err = executor.apply(&target, &create(1, "A")).unwrap_err();
        assert_eq!(err.kind(), "TargetBusy");
        assert_eq!(target.acquisitions(), 0);
    }

    #[test]
    fn test_plan_for_other_target_is_rejected() {
        let executor = executor();
        let target = MemoryTarget::new("mem");
        let plan = Plan {
            target: "other".to_string(),
            direction: Direction::Forward,
            migrations: vec![create(1, "A")],
        };

        let report = executor.execute(&target, &plan, &CancellationToken::new());
        assert_eq!(report.error.unwrap().kind(), "InvalidTransition");
        assert!(target.model().tables().is_empty());
    }

    #[test]
    fn test_unordered_plan_is_rejected() {
        let executor = executor();
        let target = MemoryTarget::new("mem");

        let report = executor.apply_plan(
            &target,
            &[create(2, "B"), create(1, "A")],
            &CancellationToken::new(),
        );
        assert_eq!(report.error.unwrap().kind(), "UnorderedMigrations");
    }

    #[test]
    fn test_uncompensated_failure_leaves_residual() {
        let executor = MigrationExecutor::new(
            Arc::new(MemoryLedger::new()),
            ExecutorConfig::default().with_compensation(false),
        );
        let target = MemoryTarget::non_transactional("mem");
        let mut m = create(1, "A");
        let second = create(1, "B");
        m.up_ops.extend(second.up_ops);
        target.fail_at_operation(1);

        let err = executor.apply(&target, &m).unwrap_err();
        match err {
            MigrationError::PartiallyApplied {
                compensated,
                residual,
                failed_operation_index,
                ..
            } => {
                assert_eq!(failed_operation_index, 1);
                assert_eq!(compensated, 0);
                assert_eq!(residual, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(target.model().table("A").is_some());
        assert!(executor.ledger().applied_ids("mem").unwrap().is_empty());
    }

    #[test]
    fn test_ledger_failure_is_compensated() {
        let executor = read_only_executor();
        let target = MemoryTarget::non_transactional("mem");

        let err = executor.apply(&target, &create_both(1)).unwrap_err();
        match err {
            MigrationError::PartiallyApplied {
                failed_operation_index,
                cause: TargetError::Ledger(_),
                compensated,
                residual,
                ..
            } => {
                assert_eq!(failed_operation_index, 2);
                assert_eq!(compensated, 2);
                assert_eq!(residual, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(target.model().tables().is_empty());
    }

    #[test]
    fn test_ledger_failure_reports_residual_changes() {
        let executor = read_only_executor();
        let target = MemoryTarget::non_transactional("mem");
        // Both creates succeed, then the first inverse is rejected.
        target.fail_at_operation(2);

        let err = executor.apply(&target, &create_both(1)).unwrap_err();
        assert_eq!(err.kind(), "PartiallyApplied");
        match err {
            MigrationError::PartiallyApplied {
                compensated,
                residual,
                ..
            } => {
                assert_eq!(compensated, 0);
                assert_eq!(residual, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(target.model().table("A").is_some());
        assert!(target.model().table("B").is_some());
        assert!(executor.ledger().applied_ids("mem").unwrap().is_empty());
        assert_eq!(executor.state("mem"), ExecutorState::Failed);
    }

    #[test]
    fn test_ledger_failure_rolls_back_transactional_target() {
        let executor = read_only_executor();
        let target = MemoryTarget::new("mem");

        let err = executor.apply(&target, &create_both(1)).unwrap_err();
        assert_eq!(err.kind(), "Storage");
        assert!(target.model().tables().is_empty());
    }
}
