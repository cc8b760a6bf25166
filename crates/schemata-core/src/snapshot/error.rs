//! Snapshot validation errors.

use thiserror::Error;

/// Reasons a snapshot (or a schema model being turned into one) is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Two tables share a name.
    #[error("duplicate table `{table}`")]
    DuplicateTable {
        /// The repeated table name.
        table: String,
    },

    /// Two columns in one table share a name.
    #[error("duplicate column `{table}.{column}`")]
    DuplicateColumn {
        /// Table holding the columns.
        table: String,
        /// The repeated column name.
        column: String,
    },

    /// A primary key names a column the table does not have.
    #[error("primary key of `{table}` references unknown column `{column}`")]
    UnknownPrimaryKeyColumn {
        /// Table name.
        table: String,
        /// Missing column.
        column: String,
    },

    /// A primary key column accepts nulls.
    #[error("primary key column `{table}.{column}` must not be nullable")]
    NullablePrimaryKey {
        /// Table name.
        table: String,
        /// Nullable key column.
        column: String,
    },

    /// A primary key lists the same column twice.
    #[error("primary key of `{table}` lists `{column}` more than once")]
    DuplicatePrimaryKeyColumn {
        /// Table name.
        table: String,
        /// Repeated key column.
        column: String,
    },

    /// An index covers no columns.
    #[error("table `{table}` declares an index without columns")]
    EmptyIndex {
        /// Table name.
        table: String,
    },

    /// An index names a column the table does not have.
    #[error("index `{index}` references unknown column `{table}.{column}`")]
    UnknownIndexColumn {
        /// Table name.
        table: String,
        /// Index display name.
        index: String,
        /// Missing column.
        column: String,
    },

    /// The same index is declared twice.
    #[error("index `{index}` is declared more than once")]
    DuplicateIndex {
        /// Index display name.
        index: String,
    },
}
