//! Migration planning.
//!
//! The planner works on an explicit, caller-built list of migrations and a
//! target's ledger entries. It never consults global state.

use super::definition::Migration;
use super::error::MigrationError;
use super::grader::{MigrationGrade, SafetyGrader};
use super::id::MigrationId;
use crate::ledger::LedgerEntry;

/// Which way a plan moves a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Apply `up_ops`, ascending ids.
    Forward,
    /// Apply `down_ops`, descending ids.
    Backward,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

/// Ordered migrations to run against one target.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Target the plan was computed for.
    pub target: String,
    /// Direction of travel.
    pub direction: Direction,
    /// Migrations in execution order.
    pub migrations: Vec<Migration>,
}

impl Plan {
    /// Whether there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Number of migrations in the plan.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Ids in execution order.
    pub fn ids(&self) -> Vec<MigrationId> {
        self.migrations.iter().map(|m| m.id).collect()
    }

    /// Safety grade of every operation the plan will run.
    pub fn grade(&self) -> MigrationGrade {
        let operations: Vec<_> = self
            .migrations
            .iter()
            .flat_map(|m| match self.direction {
                Direction::Forward => m.up_ops.iter(),
                Direction::Backward => m.down_ops.iter(),
            })
            .cloned()
            .collect();
        SafetyGrader::grade(&operations)
    }
}

/// Status of one known migration on a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Recorded in the ledger with a matching checksum.
    Applied,
    /// Recorded in the ledger, but the migration changed since.
    Modified,
    /// Not yet applied.
    Pending,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Applied => write!(f, "applied"),
            MigrationStatus::Modified => write!(f, "modified"),
            MigrationStatus::Pending => write!(f, "pending"),
        }
    }
}

/// One row of a status report.
#[derive(Debug, Clone)]
pub struct StatusRow {
    /// Migration id.
    pub id: MigrationId,
    /// Migration name.
    pub name: String,
    /// Applied, modified or pending.
    pub status: MigrationStatus,
    /// When it was applied, if it was.
    pub applied_at: Option<u64>,
    /// Number of forward operations.
    pub operations: usize,
}

/// Chooses which migrations to run, and in which order.
#[derive(Debug, Clone)]
pub struct Planner {
    known: Vec<Migration>,
    verify_checksums: bool,
}

impl Planner {
    /// Create a planner over `known`, which must be strictly ascending by id.
    pub fn new(known: Vec<Migration>) -> Result<Self, MigrationError> {
        for pair in known.windows(2) {
            let (previous, next) = (pair[0].id, pair[1].id);
            if previous == next {
                return Err(MigrationError::DuplicateMigration { migration_id: next });
            }
            if previous > next {
                return Err(MigrationError::UnorderedMigrations { previous, next });
            }
        }
        Ok(Self {
            known,
            verify_checksums: true,
        })
    }

    /// Enable or disable checksum verification of applied migrations.
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    fn position(&self, id: MigrationId) -> Option<usize> {
        self.known.binary_search_by_key(&id, |m| m.id).ok()
    }

    /// Check that `applied` is a prefix of the known list.
    pub fn verify_applied(&self, applied: &[LedgerEntry]) -> Result<(), MigrationError> {
        for (position, entry) in applied.iter().enumerate() {
            let expected = self.expect_at(position, entry.migration_id)?;
            if self.verify_checksums && expected.checksum() != entry.checksum {
                return Err(MigrationError::ChecksumMismatch {
                    migration_id: entry.migration_id,
                });
            }
        }
        Ok(())
    }

    fn expect_at(&self, position: usize, found: MigrationId) -> Result<&Migration, MigrationError> {
        match self.known.get(position) {
            Some(expected) if expected.id == found => Ok(expected),
            Some(expected) if self.position(found).is_some() => Err(MigrationError::PlanGap {
                position,
                expected: expected.id,
                found,
            }),
            _ => Err(MigrationError::UnknownMigration {
                migration_id: found,
            }),
        }
    }

    /// Pending migrations, ascending, optionally stopping at `up_to`.
    ///
    /// An `up_to` that is already applied yields an empty plan.
    pub fn plan_forward(
        &self,
        target: &str,
        applied: &[LedgerEntry],
        up_to: Option<MigrationId>,
    ) -> Result<Plan, MigrationError> {
        self.verify_applied(applied)?;
        if let Some(id) = up_to {
            if self.position(id).is_none() {
                return Err(MigrationError::UnknownMigration { migration_id: id });
            }
        }

        let migrations: Vec<Migration> = self.known[applied.len()..]
            .iter()
            .take_while(|m| up_to.map_or(true, |id| m.id <= id))
            .cloned()
            .collect();
        self.ensure_contiguous(applied.len(), &migrations)?;

        Ok(Plan {
            target: target.to_string(),
            direction: Direction::Forward,
            migrations,
        })
    }

    /// Applied migrations after `to`, newest first.
    ///
    /// `to = None` reverts everything. `to` must be in the applied prefix.
    pub fn plan_rollback(
        &self,
        target: &str,
        applied: &[LedgerEntry],
        to: Option<MigrationId>,
    ) -> Result<Plan, MigrationError> {
        self.verify_applied(applied)?;

        let keep = match to {
            None => 0,
            Some(id) => {
                let index = applied
                    .iter()
                    .position(|e| e.migration_id == id)
                    .ok_or_else(|| MigrationError::UnknownRollbackTarget {
                        target: target.to_string(),
                        migration_id: id,
                    })?;
                index + 1
            }
        };

        let mut migrations: Vec<Migration> = self.known[keep..applied.len()].to_vec();
        self.ensure_contiguous(keep, &migrations)?;
        migrations.reverse();

        Ok(Plan {
            target: target.to_string(),
            direction: Direction::Backward,
            migrations,
        })
    }

    /// Move the target to exactly `to`, choosing the direction.
    ///
    /// `None` means the initial state, before any migration.
    pub fn plan_to(
        &self,
        target: &str,
        applied: &[LedgerEntry],
        to: Option<MigrationId>,
    ) -> Result<Plan, MigrationError> {
        match to {
            None => self.plan_rollback(target, applied, None),
            Some(id) if applied.iter().any(|e| e.migration_id == id) => {
                self.plan_rollback(target, applied, Some(id))
            }
            Some(id) => self.plan_forward(target, applied, Some(id)),
        }
    }

    /// Every known migration with its state on the target.
    ///
    /// A changed checksum is reported as `Modified` rather than failing.
    pub fn status(&self, applied: &[LedgerEntry]) -> Result<Vec<StatusRow>, MigrationError> {
        for (position, entry) in applied.iter().enumerate() {
            self.expect_at(position, entry.migration_id)?;
        }

        let rows = self
            .known
            .iter()
            .enumerate()
            .map(|(position, migration)| {
                let entry = applied.get(position);
                let status = match entry {
                    Some(e) if e.checksum != migration.checksum() => MigrationStatus::Modified,
                    Some(_) => MigrationStatus::Applied,
                    None => MigrationStatus::Pending,
                };
                StatusRow {
                    id: migration.id,
                    name: migration.name.clone(),
                    status,
                    applied_at: entry.map(|e| e.applied_at),
                    operations: migration.up_ops.len(),
                }
            })
            .collect();
        Ok(rows)
    }

    /// Every planned migration must sit at its known position.
    fn ensure_contiguous(&self, start: usize, migrations: &[Migration]) -> Result<(), MigrationError> {
        for (offset, migration) in migrations.iter().enumerate() {
            self.expect_at(start + offset, migration.id)?;
        }
        Ok(())
    }
}
