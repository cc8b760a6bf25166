//! Snapshot model.
//!
//! A snapshot is the immutable shape of a schema at one point in time:
//! tables, their columns, primary keys and indexes. Snapshots are produced at
//! authoring time and compared only through the diff engine.

mod column;
mod error;
mod model;
mod schema;
mod table;
mod types;

pub use column::{ColumnDef, DefaultValue, Generated};
pub use error::SnapshotError;
pub use model::{ModelError, SchemaModel};
pub use schema::{CanonicalSnapshot, CanonicalTable, Snapshot};
pub use table::{IndexDef, TableDef};
pub use types::DataType;
