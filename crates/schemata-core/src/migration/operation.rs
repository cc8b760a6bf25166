//! Structural operations.
//!
//! [`Operation`] is a closed union: the diff engine produces it, the
//! executor hands it to a target, and the schema model applies it. Adding a
//! variant means updating every `match` over it.

use crate::snapshot::{ColumnDef, DefaultValue, IndexDef, TableDef};
use serde::{Deserialize, Serialize};

/// One reversible structural change.
///
/// Drops capture the full pre-drop definition so that their inverse can
/// recreate the structure (not the data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a table with its columns, key and indexes.
    CreateTable {
        /// Full table definition.
        table: TableDef,
    },
    /// Drop a table.
    DropTable {
        /// Definition at drop time.
        table: TableDef,
    },
    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnDef,
        /// Insert position; appended when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Definition at drop time.
        column: ColumnDef,
        /// Position at drop time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    /// Change a column's type, nullability, default or generation.
    AlterColumn {
        /// Table name.
        table: String,
        /// Definition before.
        from: ColumnDef,
        /// Definition after (same name).
        to: ColumnDef,
    },
    /// Rename a column, keeping its data.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Create a secondary index.
    AddIndex {
        /// Table name.
        table: String,
        /// Index definition.
        index: IndexDef,
    },
    /// Drop a secondary index.
    DropIndex {
        /// Table name.
        table: String,
        /// Index definition.
        index: IndexDef,
    },
    /// Change only the default value of a column.
    SetDefaultValue {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Default before.
        from: Option<DefaultValue>,
        /// Default after.
        to: Option<DefaultValue>,
    },
    /// Replace the primary key column list.
    SetPrimaryKey {
        /// Table name.
        table: String,
        /// Key columns before.
        from: Vec<String>,
        /// Key columns after.
        to: Vec<String>,
    },
}

impl Operation {
    /// The operation that undoes this one structurally.
    pub fn inverse(&self) -> Operation {
        match self {
            Operation::CreateTable { table } => Operation::DropTable {
                table: table.clone(),
            },
            Operation::DropTable { table } => Operation::CreateTable {
                table: table.clone(),
            },
            Operation::AddColumn {
                table,
                column,
                position,
            } => Operation::DropColumn {
                table: table.clone(),
                column: column.clone(),
                position: *position,
            },
            Operation::DropColumn {
                table,
                column,
                position,
            } => Operation::AddColumn {
                table: table.clone(),
                column: column.clone(),
                position: *position,
            },
            Operation::AlterColumn { table, from, to } => Operation::AlterColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            Operation::RenameColumn { table, from, to } => Operation::RenameColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            Operation::AddIndex { table, index } => Operation::DropIndex {
                table: table.clone(),
                index: index.clone(),
            },
            Operation::DropIndex { table, index } => Operation::AddIndex {
                table: table.clone(),
                index: index.clone(),
            },
            Operation::SetDefaultValue {
                table,
                column,
                from,
                to,
            } => Operation::SetDefaultValue {
                table: table.clone(),
                column: column.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            Operation::SetPrimaryKey { table, from, to } => Operation::SetPrimaryKey {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            },
        }
    }

    /// Name of the table the operation touches.
    pub fn table(&self) -> &str {
        match self {
            Operation::CreateTable { table } | Operation::DropTable { table } => &table.name,
            Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::AlterColumn { table, .. }
            | Operation::RenameColumn { table, .. }
            | Operation::AddIndex { table, .. }
            | Operation::DropIndex { table, .. }
            | Operation::SetDefaultValue { table, .. }
            | Operation::SetPrimaryKey { table, .. } => table,
        }
    }

    /// Short machine-friendly operation name.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateTable { .. } => "create_table",
            Operation::DropTable { .. } => "drop_table",
            Operation::AddColumn { .. } => "add_column",
            Operation::DropColumn { .. } => "drop_column",
            Operation::AlterColumn { .. } => "alter_column",
            Operation::RenameColumn { .. } => "rename_column",
            Operation::AddIndex { .. } => "add_index",
            Operation::DropIndex { .. } => "drop_index",
            Operation::SetDefaultValue { .. } => "set_default_value",
            Operation::SetPrimaryKey { .. } => "set_primary_key",
        }
    }

    /// Whether running the operation can lose data.
    ///
    /// Drops always can; an alter can when the new type does not widen the
    /// old one.
    pub fn is_destructive(&self) -> bool {
        match self {
            Operation::DropTable { .. } | Operation::DropColumn { .. } => true,
            Operation::AlterColumn { from, to, .. } => !from.data_type.widens_to(&to.data_type),
            _ => false,
        }
    }

    /// Human-readable one-line description.
    pub fn describe(&self) -> String {
        match self {
            Operation::CreateTable { table } => format!(
                "create table {} ({} columns)",
                table.name,
                table.columns.len()
            ),
            Operation::DropTable { table } => format!("drop table {}", table.name),
            Operation::AddColumn { table, column, .. } => format!(
                "add column {}.{} {}{}",
                table,
                column.name,
                column.data_type,
                if column.nullable { " null" } else { " not null" }
            ),
            Operation::DropColumn { table, column, .. } => {
                format!("drop column {}.{}", table, column.name)
            }
            Operation::AlterColumn { table, from, to } => format!(
                "alter column {}.{} {}{} -> {}{}",
                table,
                from.name,
                from.data_type,
                if from.nullable { " null" } else { " not null" },
                to.data_type,
                if to.nullable { " null" } else { " not null" }
            ),
            Operation::RenameColumn { table, from, to } => {
                format!("rename column {}.{} to {}", table, from, to)
            }
            Operation::AddIndex { table, index } => {
                format!("add index {}", index.name_for(table))
            }
            Operation::DropIndex { table, index } => {
                format!("drop index {}", index.name_for(table))
            }
            Operation::SetDefaultValue {
                table, column, to, ..
            } => match to {
                Some(value) => format!("set default {}.{} = {}", table, column, value),
                None => format!("drop default {}.{}", table, column),
            },
            Operation::SetPrimaryKey { table, to, .. } => {
                format!("set primary key {} ({})", table, to.join(", "))
            }
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Invert a sequence of operations: each operation inverted, order reversed.
pub fn invert_all(operations: &[Operation]) -> Vec<Operation> {
    operations.iter().rev().map(Operation::inverse).collect()
}
