//! Table and index definitions.

use super::column::ColumnDef;
use serde::{Deserialize, Serialize};

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name (unique within a snapshot).
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Names of the primary key columns.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

/// A secondary index, identified by its column list and uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexDef {
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Create a non-unique index.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Create a unique index.
    pub fn unique<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unique: true,
            ..Self::new(columns)
        }
    }

    /// Conventional index name for the given table.
    pub fn name_for(&self, table: &str) -> String {
        let prefix = if self.unique { "uq" } else { "ix" };
        format!("{}_{}_{}", prefix, table, self.columns.join("_"))
    }

    /// Whether the index covers `column`.
    pub fn references(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Rewrite references to a renamed column.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        for column in &mut self.columns {
            if column == from {
                *column = to.to_string();
            }
        }
    }
}

impl TableDef {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Append a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key columns.
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a secondary index.
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column in declaration order.
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Whether the table has an index with the same columns and uniqueness.
    pub fn has_index(&self, index: &IndexDef) -> bool {
        self.indexes.iter().any(|i| i == index)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::DataType;

    fn employees() -> TableDef {
        TableDef::new("Employees")
            .with_column(ColumnDef::new("Id", DataType::integer()).identity())
            .with_column(ColumnDef::new("Name", DataType::varchar(100)))
            .with_column(ColumnDef::nullable("Salary", DataType::decimal(10, 2)))
            .with_primary_key(["Id"])
            .with_index(IndexDef::new(["Name"]))
    }

    #[test]
    fn test_table_builder() {
        let table = employees();

        assert_eq!(table.column_names(), vec!["Id", "Name", "Salary"]);
        assert_eq!(table.primary_key, vec!["Id".to_string()]);
        assert_eq!(table.column_position("Salary"), Some(2));
        assert!(table.column("Missing").is_none());
    }

    #[test]
    fn test_index_identity() {
        let table = employees();

        assert!(table.has_index(&IndexDef::new(["Name"])));
        assert!(!table.has_index(&IndexDef::unique(["Name"])));
    }

    #[test]
    fn test_index_name_and_rename() {
        let mut index = IndexDef::unique(["first", "last"]);
        assert_eq!(index.name_for("People"), "uq_People_first_last");

        index.rename_column("last", "surname");
        assert!(index.references("surname"));
        assert!(!index.references("last"));
    }
}
