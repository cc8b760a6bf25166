//! Sled-backed reference target.
//!
//! The live schema is a JSON-encoded [`SchemaModel`] under a single key in
//! the tree `target:<id>`. A unit of work stages a copy of the model and
//! writes it back in one insert on commit.

use super::slot::{ConnectionSlot, SlotPermit};
use super::{StructuralTarget, TargetConnection, TargetError};
use crate::error::Error;
use crate::migration::Operation;
use crate::snapshot::SchemaModel;
use std::time::Duration;

const MODEL_KEY: &[u8] = b"model";

/// Structural target persisted in sled.
pub struct SledTarget {
    id: String,
    tree: sled::Tree,
    slot: ConnectionSlot,
}

impl SledTarget {
    /// Prefix of the tree holding a target's schema.
    pub const TREE_PREFIX: &'static str = "target:";

    /// Open (or create) the target `id` in `db`.
    pub fn open(db: &sled::Db, id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        let tree = db.open_tree(format!("{}{}", Self::TREE_PREFIX, id))?;
        Ok(Self {
            id,
            tree,
            slot: ConnectionSlot::new(),
        })
    }

    /// The committed schema.
    pub fn model(&self) -> Result<SchemaModel, Error> {
        load_model(&self.tree)
    }
}

fn load_model(tree: &sled::Tree) -> Result<SchemaModel, Error> {
    match tree.get(MODEL_KEY)? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(SchemaModel::new()),
    }
}

fn store_model(tree: &sled::Tree, model: &SchemaModel) -> Result<(), Error> {
    tree.insert(MODEL_KEY, serde_json::to_vec(model)?)?;
    tree.flush()?;
    Ok(())
}

impl StructuralTarget for SledTarget {
    type Connection = SledConnection;

    fn id(&self) -> &str {
        &self.id
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    fn acquire(&self, timeout: Duration) -> Result<SledConnection, TargetError> {
        let permit = self
            .slot
            .acquire(timeout)
            .ok_or_else(|| TargetError::AcquireTimeout {
                target: self.id.clone(),
                timeout,
            })?;
        Ok(SledConnection {
            _permit: permit,
            tree: self.tree.clone(),
            staged: None,
        })
    }
}

/// Connection to a [`SledTarget`].
pub struct SledConnection {
    _permit: SlotPermit,
    tree: sled::Tree,
    staged: Option<SchemaModel>,
}

impl TargetConnection for SledConnection {
    fn begin(&mut self) -> Result<(), TargetError> {
        self.staged = Some(load_model(&self.tree)?);
        Ok(())
    }

    fn execute(&mut self, operation: &Operation) -> Result<(), TargetError> {
        match self.staged.as_mut() {
            Some(staged) => staged
                .apply(operation)
                .map_err(|e| TargetError::rejected(operation, e)),
            None => {
                let mut model = load_model(&self.tree)?;
                model
                    .apply(operation)
                    .map_err(|e| TargetError::rejected(operation, e))?;
                store_model(&self.tree, &model)?;
                Ok(())
            }
        }
    }

    fn commit(&mut self) -> Result<(), TargetError> {
        if let Some(model) = self.staged.take() {
            store_model(&self.tree, &model)?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), TargetError> {
        self.staged = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ColumnDef, DataType, TableDef};

    fn create(name: &str) -> Operation {
        Operation::CreateTable {
            table: TableDef::new(name)
                .with_column(ColumnDef::new("id", DataType::integer()))
                .with_primary_key(["id"]),
        }
    }

    #[test]
    fn test_commit_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let target = SledTarget::open(&db, "main").unwrap();
            let mut conn = target.acquire(Duration::from_millis(10)).unwrap();
            conn.begin().unwrap();
            conn.execute(&create("Employees")).unwrap();
            conn.commit().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let target = SledTarget::open(&db, "main").unwrap();
        let model = target.model().unwrap();
        assert!(model.table("Employees").is_some());
    }

    #[test]
    fn test_rollback_discards_staged_model() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let target = SledTarget::open(&db, "main").unwrap();

        let mut conn = target.acquire(Duration::from_millis(10)).unwrap();
        conn.begin().unwrap();
        conn.execute(&create("Employees")).unwrap();
        conn.rollback().unwrap();

        assert!(target.model().unwrap().tables().is_empty());
    }

    #[test]
    fn test_targets_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let a = SledTarget::open(&db, "a").unwrap();
        let b = SledTarget::open(&db, "b").unwrap();

        let mut conn = a.acquire(Duration::from_millis(10)).unwrap();
        conn.execute(&create("Only")).unwrap();

        assert!(a.model().unwrap().table("Only").is_some());
        assert!(b.model().unwrap().tables().is_empty());
    }
}
