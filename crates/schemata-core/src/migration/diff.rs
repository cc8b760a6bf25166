//! Snapshot diffing.
//!
//! Compares two snapshots and produces the ordered, reversible operation
//! list that turns the first into the second. Diffing is a pure function
//! of its inputs.
//!
//! Operations are emitted in phases so that each one is valid against the
//! schema produced by the ones before it:
//!
//! 1. drop indexes
//! 2. drop columns (highest position first)
//! 3. drop tables
//! 4. create tables
//! 5. add columns
//! 6. alter columns, defaults and primary keys
//! 7. add indexes
//! 8. rename columns
//!
//! Renames run last, so every earlier operation on a renamed table uses the
//! pre-rename column names.

use super::error::MigrationError;
use super::grader::{MigrationGrade, SafetyGrader};
use super::operation::{invert_all, Operation};
use crate::snapshot::{ColumnDef, DataType, IndexDef, Snapshot, TableDef};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Explicit column renames, per table.
///
/// Without a hint, a column that disappears while another appears is a
/// drop plus an add, and its data is lost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameHints {
    tables: BTreeMap<String, BTreeMap<String, String>>,
}

impl RenameHints {
    /// No hints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hint: `table.from` becomes `table.to`.
    pub fn rename(
        mut self,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.insert(table, from, to);
        self
    }

    /// Add a hint in place. A later hint for the same source replaces it.
    pub fn insert(
        &mut self,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) {
        self.tables
            .entry(table.into())
            .or_default()
            .insert(from.into(), to.into());
    }

    /// Renames for one table, old name to new name.
    pub fn for_table(&self, table: &str) -> Option<&BTreeMap<String, String>> {
        self.tables.get(table)
    }

    fn validate(&self, before: &Snapshot, after: &Snapshot) -> Result<(), MigrationError> {
        for (table, renames) in &self.tables {
            let mut targets = HashSet::new();
            for (from, to) in renames {
                let invalid = |reason: &str| MigrationError::InvalidRenameHint {
                    table: table.clone(),
                    from: from.clone(),
                    to: to.clone(),
                    reason: reason.to_string(),
                };
                let (Some(old), Some(new)) = (before.table(table), after.table(table)) else {
                    return Err(invalid("table must exist in both snapshots"));
                };
                if old.column(from).is_none() {
                    return Err(invalid("source column does not exist before"));
                }
                if new.column(from).is_some() {
                    return Err(invalid("source column still exists after"));
                }
                if new.column(to).is_none() {
                    return Err(invalid("destination column does not exist after"));
                }
                if old.column(to).is_some() {
                    return Err(invalid("destination column already exists before"));
                }
                if !targets.insert(to.as_str()) {
                    return Err(invalid("destination is claimed by another hint"));
                }
            }
        }
        Ok(())
    }
}

/// Something in a diff that can fail or lose data on a populated target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffWarning {
    /// A non-nullable column without default or generation added to an
    /// existing table.
    RequiredColumnWithoutDefault {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// A column made non-nullable without a default.
    NotNullWithoutDefault {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// A type change that does not widen the column.
    NarrowingTypeChange {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Type before.
        from: DataType,
        /// Type after.
        to: DataType,
    },
}

impl std::fmt::Display for DiffWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffWarning::RequiredColumnWithoutDefault { table, column } => write!(
                f,
                "{}.{} is added as not null without a default; existing rows have no value",
                table, column
            ),
            DiffWarning::NotNullWithoutDefault { table, column } => write!(
                f,
                "{}.{} becomes not null without a default; existing nulls have no value",
                table, column
            ),
            DiffWarning::NarrowingTypeChange {
                table,
                column,
                from,
                to,
            } => write!(
                f,
                "{}.{} narrows from {} to {}; values may not fit",
                table, column, from, to
            ),
        }
    }
}

/// Ordered operations turning one snapshot into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDiff {
    /// Version of the `before` snapshot.
    pub from_version: u64,
    /// Version of the `after` snapshot.
    pub to_version: u64,
    /// Operations from `before` to `after`.
    pub up_ops: Vec<Operation>,
    /// Operations from `after` back to `before`.
    pub down_ops: Vec<Operation>,
}

/// Result of a diff: the operations plus any warnings the caller must
/// acknowledge before turning them into a migration.
#[derive(Debug, Clone)]
#[must_use = "a diff with warnings must be accepted explicitly"]
pub struct DiffOutcome {
    diff: SchemaDiff,
    warnings: Vec<DiffWarning>,
}

impl DiffOutcome {
    /// Warnings found while diffing.
    pub fn warnings(&self) -> &[DiffWarning] {
        &self.warnings
    }

    /// Peek at the diff without accepting it.
    pub fn diff(&self) -> &SchemaDiff {
        &self.diff
    }

    /// Safety grade of the forward operations.
    pub fn grade(&self) -> MigrationGrade {
        SafetyGrader::grade(&self.diff.up_ops)
    }

    /// Take the diff if it carries no warnings.
    pub fn accept(self) -> Result<SchemaDiff, MigrationError> {
        if self.warnings.is_empty() {
            Ok(self.diff)
        } else {
            Err(MigrationError::IncompatibleDiff {
                warnings: self.warnings,
            })
        }
    }

    /// Take the diff, acknowledging its warnings.
    pub fn accept_with_warnings(self) -> SchemaDiff {
        self.diff
    }
}

#[derive(Default)]
struct Phases {
    drop_indexes: Vec<Operation>,
    drop_columns: Vec<Operation>,
    drop_tables: Vec<Operation>,
    create_tables: Vec<Operation>,
    add_columns: Vec<Operation>,
    alters: Vec<Operation>,
    add_indexes: Vec<Operation>,
    renames: Vec<Operation>,
    warnings: Vec<DiffWarning>,
}

impl Phases {
    fn into_outcome(self, before: &Snapshot, after: &Snapshot) -> DiffOutcome {
        let up_ops: Vec<Operation> = [
            self.drop_indexes,
            self.drop_columns,
            self.drop_tables,
            self.create_tables,
            self.add_columns,
            self.alters,
            self.add_indexes,
            self.renames,
        ]
        .into_iter()
        .flatten()
        .collect();
        let down_ops = invert_all(&up_ops);

        DiffOutcome {
            diff: SchemaDiff {
                from_version: before.version(),
                to_version: after.version(),
                up_ops,
                down_ops,
            },
            warnings: self.warnings,
        }
    }
}

impl SchemaDiff {
    /// Diff `before` against `after`.
    ///
    /// Fails only when a rename hint does not describe a rename between the
    /// two snapshots. Structurally identical snapshots yield an empty diff.
    pub fn compute(
        before: &Snapshot,
        after: &Snapshot,
        hints: &RenameHints,
    ) -> Result<DiffOutcome, MigrationError> {
        hints.validate(before, after)?;

        let mut phases = Phases::default();
        let no_renames = BTreeMap::new();

        for old in before.tables() {
            match after.table(&old.name) {
                Some(new) => {
                    let renames = hints.for_table(&old.name).unwrap_or(&no_renames);
                    Self::diff_table(old, new, renames, &mut phases);
                }
                None => phases
                    .drop_tables
                    .push(Operation::DropTable { table: old.clone() }),
            }
        }

        for new in after.tables() {
            if before.table(&new.name).is_none() {
                phases
                    .create_tables
                    .push(Operation::CreateTable { table: new.clone() });
            }
        }

        Ok(phases.into_outcome(before, after))
    }

    /// Whether the diff has no operations.
    pub fn is_empty(&self) -> bool {
        self.up_ops.is_empty() && self.down_ops.is_empty()
    }

    /// Number of forward operations.
    pub fn change_count(&self) -> usize {
        self.up_ops.len()
    }

    fn diff_table(
        old: &TableDef,
        new: &TableDef,
        renames: &BTreeMap<String, String>,
        phases: &mut Phases,
    ) {
        let table = old.name.as_str();
        let reverse: HashMap<&str, &str> = renames
            .iter()
            .map(|(from, to)| (to.as_str(), from.as_str()))
            .collect();
        let pre_rename = |name: &str| -> String {
            reverse.get(name).copied().unwrap_or(name).to_string()
        };

        // Columns
        let mut dropped: Vec<(usize, &ColumnDef)> = old
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| new.column(&c.name).is_none() && !renames.contains_key(&c.name))
            .collect();
        dropped.sort_by(|a, b| b.0.cmp(&a.0));
        for (position, column) in dropped {
            phases.drop_columns.push(Operation::DropColumn {
                table: table.to_string(),
                column: column.clone(),
                position: Some(position),
            });
        }

        for (position, column) in new.columns.iter().enumerate() {
            let old_name = pre_rename(column.name.as_str());
            match old.column(&old_name) {
                None => {
                    if !column.can_fill_existing_rows() {
                        phases
                            .warnings
                            .push(DiffWarning::RequiredColumnWithoutDefault {
                                table: table.to_string(),
                                column: column.name.clone(),
                            });
                    }
                    phases.add_columns.push(Operation::AddColumn {
                        table: table.to_string(),
                        column: column.clone(),
                        position: Some(position),
                    });
                }
                Some(previous) => {
                    let target = column.renamed(old_name);
                    Self::diff_column(table, previous, target, phases);
                }
            }
        }

        // Primary key
        let key: Vec<String> = new.primary_key.iter().map(|k| pre_rename(k.as_str())).collect();
        if key != old.primary_key {
            phases.alters.push(Operation::SetPrimaryKey {
                table: table.to_string(),
                from: old.primary_key.clone(),
                to: key,
            });
        }

        // Indexes, compared by (columns, unique)
        let wanted: Vec<IndexDef> = new
            .indexes
            .iter()
            .map(|index| {
                let mut index = index.clone();
                for (from, to) in renames {
                    index.rename_column(to, from);
                }
                index
            })
            .collect();
        for index in &old.indexes {
            if !wanted.contains(index) {
                phases.drop_indexes.push(Operation::DropIndex {
                    table: table.to_string(),
                    index: index.clone(),
                });
            }
        }
        for index in wanted {
            if !old.has_index(&index) {
                phases.add_indexes.push(Operation::AddIndex {
                    table: table.to_string(),
                    index,
                });
            }
        }

        for (from, to) in renames {
            phases.renames.push(Operation::RenameColumn {
                table: table.to_string(),
                from: from.clone(),
                to: to.clone(),
            });
        }
    }

    /// `target` carries the pre-rename name, so only shape differences remain.
    fn diff_column(table: &str, previous: &ColumnDef, target: ColumnDef, phases: &mut Phases) {
        if *previous == target {
            return;
        }

        if previous.differs_only_in_default(&target) {
            phases.alters.push(Operation::SetDefaultValue {
                table: table.to_string(),
                column: target.name.clone(),
                from: previous.default.clone(),
                to: target.default,
            });
            return;
        }

        if previous.nullable && !target.can_fill_existing_rows() {
            phases.warnings.push(DiffWarning::NotNullWithoutDefault {
                table: table.to_string(),
                column: target.name.clone(),
            });
        }
        if !previous.data_type.widens_to(&target.data_type) {
            phases.warnings.push(DiffWarning::NarrowingTypeChange {
                table: table.to_string(),
                column: target.name.clone(),
                from: previous.data_type.clone(),
                to: target.data_type.clone(),
            });
        }

        phases.alters.push(Operation::AlterColumn {
            table: table.to_string(),
            from: previous.clone(),
            to: target,
        });
    }
}
