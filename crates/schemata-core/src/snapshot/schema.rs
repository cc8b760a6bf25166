//! Snapshot - immutable, versioned description of a schema's shape.

use super::error::SnapshotError;
use super::{ColumnDef, IndexDef, TableDef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// An immutable, validated snapshot of a schema.
///
/// Tables keep their declaration order; lookups go by name. A snapshot can
/// only be obtained through [`Snapshot::new`] (or deserialization, which
/// runs the same validation), so every instance satisfies the structural
/// invariants: unique table names, unique column names per table, primary
/// key columns that exist and are non-nullable, and indexes over existing
/// columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotRepr", into = "SnapshotRepr")]
pub struct Snapshot {
    name: String,
    version: u64,
    tables: Vec<TableDef>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotRepr {
    name: String,
    version: u64,
    #[serde(default)]
    tables: Vec<TableDef>,
}

impl TryFrom<SnapshotRepr> for Snapshot {
    type Error = SnapshotError;

    fn try_from(repr: SnapshotRepr) -> Result<Self, Self::Error> {
        Snapshot::new(repr.name, repr.version, repr.tables)
    }
}

impl From<Snapshot> for SnapshotRepr {
    fn from(snapshot: Snapshot) -> Self {
        SnapshotRepr {
            name: snapshot.name,
            version: snapshot.version,
            tables: snapshot.tables,
        }
    }
}

impl Snapshot {
    /// Build a snapshot, validating its structure.
    pub fn new(
        name: impl Into<String>,
        version: u64,
        tables: Vec<TableDef>,
    ) -> Result<Self, SnapshotError> {
        validate_tables(&tables)?;
        Ok(Self {
            name: name.into(),
            version,
            tables,
        })
    }

    /// A snapshot with no tables.
    pub fn empty(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
            tables: Vec::new(),
        }
    }

    /// Snapshot label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Table names in declaration order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Canonical form used for structural comparison.
    ///
    /// Declaration order is dropped: tables and columns are keyed by name,
    /// indexes become a set. The primary key keeps its order since it is
    /// significant for composite keys.
    pub fn diffable_representation(&self) -> CanonicalSnapshot {
        CanonicalSnapshot::from_tables(&self.tables)
    }

    /// Whether two snapshots describe the same shape, ignoring name and version.
    pub fn structurally_equals(&self, other: &Snapshot) -> bool {
        self.diffable_representation() == other.diffable_representation()
    }
}

/// Order-insensitive form of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalSnapshot {
    /// Tables keyed by name.
    pub tables: BTreeMap<String, CanonicalTable>,
}

/// Order-insensitive form of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTable {
    /// Columns keyed by name.
    pub columns: BTreeMap<String, ColumnDef>,
    /// Primary key columns in key order.
    pub primary_key: Vec<String>,
    /// Index set.
    pub indexes: BTreeSet<IndexDef>,
}

impl CanonicalSnapshot {
    pub(crate) fn from_tables(tables: &[TableDef]) -> Self {
        let tables = tables
            .iter()
            .map(|t| {
                let table = CanonicalTable {
                    columns: t
                        .columns
                        .iter()
                        .map(|c| (c.name.clone(), c.clone()))
                        .collect(),
                    primary_key: t.primary_key.clone(),
                    indexes: t.indexes.iter().cloned().collect(),
                };
                (t.name.clone(), table)
            })
            .collect();
        Self { tables }
    }
}

fn validate_tables(tables: &[TableDef]) -> Result<(), SnapshotError> {
    let mut table_names = HashSet::new();
    for table in tables {
        if !table_names.insert(table.name.as_str()) {
            return Err(SnapshotError::DuplicateTable {
                table: table.name.clone(),
            });
        }
        validate_table(table)?;
    }
    Ok(())
}

fn validate_table(table: &TableDef) -> Result<(), SnapshotError> {
    let mut column_names = HashSet::new();
    for column in &table.columns {
        if !column_names.insert(column.name.as_str()) {
            return Err(SnapshotError::DuplicateColumn {
                table: table.name.clone(),
                column: column.name.clone(),
            });
        }
    }

    let mut key_columns = HashSet::new();
    for key in &table.primary_key {
        if !key_columns.insert(key.as_str()) {
            return Err(SnapshotError::DuplicatePrimaryKeyColumn {
                table: table.name.clone(),
                column: key.clone(),
            });
        }
        match table.column(key) {
            None => {
                return Err(SnapshotError::UnknownPrimaryKeyColumn {
                    table: table.name.clone(),
                    column: key.clone(),
                })
            }
            Some(column) if column.nullable => {
                return Err(SnapshotError::NullablePrimaryKey {
                    table: table.name.clone(),
                    column: key.clone(),
                })
            }
            Some(_) => {}
        }
    }

    let mut seen_indexes = HashSet::new();
    for index in &table.indexes {
        if index.columns.is_empty() {
            return Err(SnapshotError::EmptyIndex {
                table: table.name.clone(),
            });
        }
        if let Some(missing) = index.columns.iter().find(|c| !column_names.contains(c.as_str())) {
            return Err(SnapshotError::UnknownIndexColumn {
                table: table.name.clone(),
                index: index.name_for(&table.name),
                column: missing.clone(),
            });
        }
        if !seen_indexes.insert(index) {
            return Err(SnapshotError::DuplicateIndex {
                index: index.name_for(&table.name),
            });
        }
    }

    Ok(())
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
    }

    fn departments() -> TableDef {
        TableDef::new("Departments")
            .with_column(ColumnDef::new("Code", DataType::varchar(8)))
            .with_column(ColumnDef::new("Title", DataType::text()))
            .with_primary_key(["Code"])
            .with_index(IndexDef::unique(["Title"]))
    }

    #[test]
    fn test_valid_snapshot() {
        let snapshot = Snapshot::new("hr", 1, vec![employees(), departments()]).unwrap();

        assert_eq!(snapshot.name(), "hr");
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.table_names(), vec!["Employees", "Departments"]);
        assert!(snapshot.table("Employees").is_some());
        assert!(snapshot.table("Missing").is_none());
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let result = Snapshot::new("hr", 1, vec![employees(), employees()]);
        assert!(matches!(result, Err(SnapshotError::DuplicateTable { .. })));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let table = employees().with_column(ColumnDef::new("Name", DataType::text()));
        let result = Snapshot::new("hr", 1, vec![table]);
        assert!(matches!(
            result,
            Err(SnapshotError::DuplicateColumn { ref column, .. }) if column == "Name"
        ));
    }

    #[test]
    fn test_nullable_primary_key_rejected() {
        let table = TableDef::new("Audit")
            .with_column(ColumnDef::nullable("Id", DataType::integer()))
            .with_primary_key(["Id"]);
        let result = Snapshot::new("hr", 1, vec![table]);
        assert!(matches!(result, Err(SnapshotError::NullablePrimaryKey { .. })));
    }

    #[test]
    fn test_unknown_primary_key_rejected() {
        let table = TableDef::new("Audit")
            .with_column(ColumnDef::new("Id", DataType::integer()))
            .with_primary_key(["Key"]);
        let result = Snapshot::new("hr", 1, vec![table]);
        assert!(matches!(
            result,
            Err(SnapshotError::UnknownPrimaryKeyColumn { .. })
        ));
    }

    #[test]
    fn test_index_on_unknown_column_rejected() {
        let table = employees().with_index(IndexDef::new(["Email"]));
        let result = Snapshot::new("hr", 1, vec![table]);
        assert!(matches!(result, Err(SnapshotError::UnknownIndexColumn { .. })));
    }

    #[test]
    fn test_canonical_form_ignores_declaration_order() {
        let a = Snapshot::new("a", 1, vec![employees(), departments()]).unwrap();

        let mut reordered = employees();
        reordered.columns.reverse();
        let b = Snapshot::new("b", 7, vec![departments(), reordered]).unwrap();

        assert_ne!(a, b);
        assert!(a.structurally_equals(&b));
    }

    #[test]
    fn test_deserialization_validates() {
        let json = r#"{
            "name": "bad",
            "version": 1,
            "tables": [{
                "name": "T",
                "columns": [{"name": "Id", "data_type": {"kind": "integer", "bits": 32}, "nullable": true}],
                "primary_key": ["Id"]
            }]
        }"#;

        let result: Result<Snapshot, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let snapshot = Snapshot::new("hr", 3, vec![employees(), departments()]).unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: Snapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, snapshot);
    }
}
