//! Executor state and plan reports.

use super::error::MigrationError;
use super::id::MigrationId;
use super::planner::Direction;

/// Where the executor is with a target.
///
/// `Idle → Executing → Committed | Failed`. The final state stays visible
/// until the next migration for the target starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorState {
    /// Nothing has run yet.
    #[default]
    Idle,
    /// A migration is running.
    Executing,
    /// The last migration committed.
    Committed,
    /// The last migration failed.
    Failed,
}

impl std::fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorState::Idle => write!(f, "idle"),
            ExecutorState::Executing => write!(f, "executing"),
            ExecutorState::Committed => write!(f, "committed"),
            ExecutorState::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of running a list of migrations against one target.
#[derive(Debug)]
pub struct PlanReport {
    /// Target the plan ran against.
    pub target: String,
    /// Direction of the run.
    pub direction: Direction,
    /// Migrations applied or reverted, in execution order.
    pub completed: Vec<MigrationId>,
    /// How many completed migrations had no operations.
    pub skipped_no_ops: usize,
    /// Whether the run stopped on a cancellation request.
    pub cancelled: bool,
    /// Failure that stopped the run.
    pub error: Option<MigrationError>,
}

impl PlanReport {
    pub(crate) fn new(target: impl Into<String>, direction: Direction) -> Self {
        Self {
            target: target.into(),
            direction,
            completed: Vec::new(),
            skipped_no_ops: 0,
            cancelled: false,
            error: None,
        }
    }

    pub(crate) fn failed(
        target: impl Into<String>,
        direction: Direction,
        error: MigrationError,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::new(target, direction)
        }
    }

    /// Number of migrations that completed.
    pub fn succeeded(&self) -> usize {
        self.completed.len()
    }

    /// Whether the run finished without an error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a `Result`, surfacing the stopping error.
    pub fn into_result(self) -> Result<Self, MigrationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}
