//! Mutable schema model that structural operations are applied to.
//!
//! A [`Snapshot`] is frozen; a [`SchemaModel`] is the working copy the
//! reference targets keep as their live schema and that round-trip checks
//! replay operations against.

use super::error::SnapshotError;
use super::schema::CanonicalSnapshot;
use super::{Snapshot, TableDef};
use crate::migration::Operation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to apply an operation to a schema model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The table does not exist.
    #[error("table `{0}` does not exist")]
    UnknownTable(String),

    /// The table already exists.
    #[error("table `{0}` already exists")]
    TableExists(String),

    /// The column does not exist.
    #[error("column `{table}.{column}` does not exist")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// The column already exists.
    #[error("column `{table}.{column}` already exists")]
    ColumnExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// The column is still covered by an index.
    #[error("column `{table}.{column}` is used by index `{index}`")]
    ColumnInUse {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Index display name.
        index: String,
    },

    /// The index does not exist.
    #[error("index `{0}` does not exist")]
    UnknownIndex(String),

    /// The index already exists.
    #[error("index `{0}` already exists")]
    IndexExists(String),

    /// An alter changes the column name.
    #[error("alter of `{table}.{column}` must not rename it (use a rename operation)")]
    AlterRenames {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
}

/// Working copy of a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaModel {
    tables: Vec<TableDef>,
}

impl SchemaModel {
    /// An empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            tables: snapshot.tables().to_vec(),
        }
    }

    /// Tables in their current order.
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Canonical form, comparable with [`Snapshot::diffable_representation`].
    pub fn canonical(&self) -> CanonicalSnapshot {
        CanonicalSnapshot::from_tables(&self.tables)
    }

    /// Whether the model has the same shape as `snapshot`.
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        self.canonical() == snapshot.diffable_representation()
    }

    /// Freeze the model into a validated snapshot.
    pub fn to_snapshot(&self, name: impl Into<String>, version: u64) -> Result<Snapshot, SnapshotError> {
        Snapshot::new(name, version, self.tables.clone())
    }

    /// Apply a sequence of operations, stopping at the first failure.
    pub fn apply_all<'a, I>(&mut self, operations: I) -> Result<(), ModelError>
    where
        I: IntoIterator<Item = &'a Operation>,
    {
        for operation in operations {
            self.apply(operation)?;
        }
        Ok(())
    }

    /// Apply one structural operation.
    ///
    /// On error the model is left unchanged.
    pub fn apply(&mut self, operation: &Operation) -> Result<(), ModelError> {
        match operation {
            Operation::CreateTable { table } => {
                if self.table(&table.name).is_some() {
                    return Err(ModelError::TableExists(table.name.clone()));
                }
                self.tables.push(table.clone());
            }
            Operation::DropTable { table } => {
                let position = self
                    .tables
                    .iter()
                    .position(|t| t.name == table.name)
                    .ok_or_else(|| ModelError::UnknownTable(table.name.clone()))?;
                self.tables.remove(position);
            }
            Operation::AddColumn {
                table,
                column,
                position,
            } => {
                let t = self.table_mut(table)?;
                if t.column(&column.name).is_some() {
                    return Err(ModelError::ColumnExists {
                        table: table.clone(),
                        column: column.name.clone(),
                    });
                }
                match position {
                    Some(p) => {
                        let at = (*p).min(t.columns.len());
                        t.columns.insert(at, column.clone());
                    }
                    None => t.columns.push(column.clone()),
                }
            }
            Operation::DropColumn { table, column, .. } => {
                let t = self.table_mut(table)?;
                let at = column_position(t, &column.name)?;
                if let Some(index) = t.indexes.iter().find(|i| i.references(&column.name)) {
                    return Err(ModelError::ColumnInUse {
                        table: table.clone(),
                        column: column.name.clone(),
                        index: index.name_for(table),
                    });
                }
                t.columns.remove(at);
            }
            Operation::AlterColumn { table, from, to } => {
                if from.name != to.name {
                    return Err(ModelError::AlterRenames {
                        table: table.clone(),
                        column: from.name.clone(),
                    });
                }
                let t = self.table_mut(table)?;
                let at = column_position(t, &from.name)?;
                t.columns[at] = to.clone();
            }
            Operation::RenameColumn { table, from, to } => {
                let t = self.table_mut(table)?;
                let at = column_position(t, from)?;
                if t.column(to).is_some() {
                    return Err(ModelError::ColumnExists {
                        table: table.clone(),
                        column: to.clone(),
                    });
                }
                t.columns[at].name = to.clone();
                for key in &mut t.primary_key {
                    if key == from {
                        *key = to.clone();
                    }
                }
                for index in &mut t.indexes {
                    index.rename_column(from, to);
                }
            }
            Operation::AddIndex { table, index } => {
                let t = self.table_mut(table)?;
                if t.has_index(index) {
                    return Err(ModelError::IndexExists(index.name_for(table)));
                }
                if let Some(missing) = index.columns.iter().find(|c| t.column(c).is_none()) {
                    return Err(ModelError::UnknownColumn {
                        table: table.clone(),
                        column: missing.clone(),
                    });
                }
                t.indexes.push(index.clone());
            }
            Operation::DropIndex { table, index } => {
                let t = self.table_mut(table)?;
                let at = t
                    .indexes
                    .iter()
                    .position(|i| i == index)
                    .ok_or_else(|| ModelError::UnknownIndex(index.name_for(table)))?;
                t.indexes.remove(at);
            }
            Operation::SetDefaultValue {
                table, column, to, ..
            } => {
                let t = self.table_mut(table)?;
                let at = column_position(t, column)?;
                t.columns[at].default = to.clone();
            }
            Operation::SetPrimaryKey { table, to, .. } => {
                // Key columns may be transiently absent while a migration
                // is mid-way; the final shape is validated as a snapshot.
                let t = self.table_mut(table)?;
                t.primary_key = to.clone();
            }
        }
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableDef, ModelError> {
        self.tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| ModelError::UnknownTable(name.to_string()))
    }
}

fn column_position(table: &TableDef, column: &str) -> Result<usize, ModelError> {
    table
        .column_position(column)
        .ok_or_else(|| ModelError::UnknownColumn {
            table: table.name.clone(),
            column: column.to_string(),
        })
}
