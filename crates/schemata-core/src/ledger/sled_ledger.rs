//! Sled-backed ledger.
//!
//! One tree per target, named `ledger:<target>`. Keys are the 12-byte
//! big-endian migration id, so tree order is id order and the head is
//! `tree.last()`. Values are rkyv-encoded [`LedgerEntry`] records.

use super::{check_append, check_revert, HistoryLedger, LedgerEntry};
use crate::error::Error;
use crate::migration::{MigrationError, MigrationId};
use parking_lot::Mutex;

/// Durable ledger stored in sled.
pub struct SledLedger {
    db: sled::Db,
    /// Serializes read-check-write sequences within this process.
    write_lock: Mutex<()>,
}

impl SledLedger {
    /// Prefix of per-target ledger trees.
    pub const TREE_PREFIX: &'static str = "ledger:";

    /// Open a ledger over an existing database.
    pub fn open(db: &sled::Db) -> Self {
        Self {
            db: db.clone(),
            write_lock: Mutex::new(()),
        }
    }

    /// Open a database at `path` and the ledger inside it.
    pub fn open_path(path: impl AsRef<std::path::Path>) -> Result<Self, MigrationError> {
        let db = sled::open(path).map_err(Error::from)?;
        Ok(Self::open(&db))
    }

    /// The underlying database.
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Flush changes to disk.
    pub fn flush(&self) -> Result<(), MigrationError> {
        self.db.flush().map_err(Error::from)?;
        Ok(())
    }

    fn tree_name(target: &str) -> String {
        format!("{}{}", Self::TREE_PREFIX, target)
    }

    /// Open the ledger tree for `target`, creating it.
    fn tree(&self, target: &str) -> Result<sled::Tree, MigrationError> {
        let tree = self
            .db
            .open_tree(Self::tree_name(target))
            .map_err(Error::from)?;
        Ok(tree)
    }

    /// The ledger tree for `target` if anything was ever recorded for it.
    /// Reads go through here so an unknown target leaves no tree behind.
    fn existing_tree(&self, target: &str) -> Result<Option<sled::Tree>, MigrationError> {
        let name = Self::tree_name(target);
        if !self.db.tree_names().iter().any(|n| &**n == name.as_bytes()) {
            return Ok(None);
        }
        Ok(Some(self.tree(target)?))
    }

    /// Flush `tree`. On failure `key` is put back to `previous` so an error
    /// from the ledger always means nothing was recorded.
    fn flush_or_restore<F>(
        tree: &sled::Tree,
        key: &[u8],
        previous: Option<sled::IVec>,
        flush: F,
    ) -> Result<(), MigrationError>
    where
        F: FnOnce(&sled::Tree) -> sled::Result<usize>,
    {
        let Err(e) = flush(tree) else {
            return Ok(());
        };
        let restored = match previous {
            Some(value) => tree.insert(key, value).map(|_| ()),
            None => tree.remove(key).map(|_| ()),
        };
        if let Err(restore) = restored {
            tracing::warn!(error = %restore, "could not restore ledger tree after failed flush");
        }
        Err(Error::from(e).into())
    }

    fn head(tree: &sled::Tree) -> Result<Option<MigrationId>, MigrationError> {
        match tree.last().map_err(Error::from)? {
            Some((key, _)) => Ok(Some(MigrationId::from_key(&key)?)),
            None => Ok(None),
        }
    }
}

impl HistoryLedger for SledLedger {
    fn entries(&self, target: &str) -> Result<Vec<LedgerEntry>, MigrationError> {
        let Some(tree) = self.existing_tree(target)? else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for result in tree.iter() {
            let (_, value) = result.map_err(Error::from)?;
            entries.push(LedgerEntry::from_bytes(&value)?);
        }
        Ok(entries)
    }

    fn last_applied(&self, target: &str) -> Result<Option<LedgerEntry>, MigrationError> {
        let Some(tree) = self.existing_tree(target)? else {
            return Ok(None);
        };
        match tree.last().map_err(Error::from)? {
            Some((_, value)) => Ok(Some(LedgerEntry::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    fn record_applied(&self, target: &str, entry: LedgerEntry) -> Result<(), MigrationError> {
        let _guard = self.write_lock.lock();
        let tree = self.tree(target)?;
        check_append(target, Self::head(&tree)?, entry.migration_id)?;

        let key = entry.migration_id.to_key();
        tree.insert(key, entry.to_bytes()?).map_err(Error::from)?;
        Self::flush_or_restore(&tree, &key, None, sled::Tree::flush)
    }

    fn record_reverted(
        &self,
        target: &str,
        id: MigrationId,
    ) -> Result<LedgerEntry, MigrationError> {
        let _guard = self.write_lock.lock();
        let not_applied = || MigrationError::InvalidTransition {
            target: target.to_string(),
            migration_id: id,
            reason: "migration is not applied".to_string(),
        };

        let tree = self.existing_tree(target)?;
        let ids = match &tree {
            Some(tree) => tree
                .iter()
                .keys()
                .map(|key| MigrationId::from_key(&key?))
                .collect::<Result<Vec<_>, Error>>()?,
            None => Vec::new(),
        };
        check_revert(target, &ids, id)?;

        let tree = tree.ok_or_else(not_applied)?;
        let key = id.to_key();
        let removed = tree
            .remove(key)
            .map_err(Error::from)?
            .ok_or_else(not_applied)?;
        Self::flush_or_restore(&tree, &key, Some(removed.clone()), sled::Tree::flush)?;
        Ok(LedgerEntry::from_bytes(&removed)?)
    }

    fn targets(&self) -> Result<Vec<String>, MigrationError> {
        let mut targets = Vec::new();
        for name in self.db.tree_names() {
            let Some(target) = name.strip_prefix(Self::TREE_PREFIX.as_bytes()) else {
                continue;
            };
            let tree = self.db.open_tree(&name).map_err(Error::from)?;
            if !tree.is_empty() {
                targets.push(String::from_utf8_lossy(target).into_owned());
            }
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{exercise_ledger, migration};

    #[test]
    fn test_sled_ledger_contract() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SledLedger::open_path(dir.path()).unwrap();
        exercise_ledger(&ledger);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = SledLedger::open_path(dir.path()).unwrap();
            for ts in [1, 2] {
                ledger
                    .record_applied("prod", LedgerEntry::new(&migration(ts)))
                    .unwrap();
            }
            ledger.flush().unwrap();
        }

        let ledger = SledLedger::open_path(dir.path()).unwrap();
        let ids = ledger.applied_ids("prod").unwrap();
        assert_eq!(ids, vec![MigrationId::new(1, 0), MigrationId::new(2, 0)]);
        assert_eq!(
            ledger.last_applied("prod").unwrap().unwrap().name,
            "m2".to_string()
        );
    }

    #[test]
    fn test_key_order_is_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SledLedger::open_path(dir.path()).unwrap();

        // A little-endian key would put 256 before 1.
        ledger
            .record_applied("prod", LedgerEntry::new(&migration(1)))
            .unwrap();
        ledger
            .record_applied("prod", LedgerEntry::new(&migration(256)))
            .unwrap();

        assert_eq!(
            ledger.applied_ids("prod").unwrap(),
            vec![MigrationId::new(1, 0), MigrationId::new(256, 0)]
        );
    }

    fn failing_flush(_: &sled::Tree) -> sled::Result<usize> {
        Err(sled::Error::Unsupported("disk full".to_string()))
    }

    #[test]
    fn test_failed_flush_undoes_append() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SledLedger::open_path(dir.path()).unwrap();
        let entry = LedgerEntry::new(&migration(1));
        let key = entry.migration_id.to_key();

        let tree = ledger.tree("prod").unwrap();
        tree.insert(key, entry.to_bytes().unwrap()).unwrap();
        let err = SledLedger::flush_or_restore(&tree, &key, None, failing_flush).unwrap_err();

        assert_eq!(err.kind(), "Storage");
        assert!(ledger.applied_ids("prod").unwrap().is_empty());
    }

    #[test]
    fn test_failed_flush_undoes_revert() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SledLedger::open_path(dir.path()).unwrap();
        ledger
            .record_applied("prod", LedgerEntry::new(&migration(1)))
            .unwrap();
        let key = MigrationId::new(1, 0).to_key();

        let tree = ledger.tree("prod").unwrap();
        let removed = tree.remove(key).unwrap().unwrap();
        SledLedger::flush_or_restore(&tree, &key, Some(removed), failing_flush).unwrap_err();

        assert_eq!(ledger.applied_ids("prod").unwrap(), vec![MigrationId::new(1, 0)]);
    }

    #[test]
    fn test_reads_do_not_create_trees() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SledLedger::open_path(dir.path()).unwrap();
        let trees_before = ledger.db().tree_names().len();

        assert!(ledger.entries("typo").unwrap().is_empty());
        assert!(ledger.last_applied("typo").unwrap().is_none());
        let err = ledger
            .record_reverted("typo", MigrationId::new(1, 0))
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidTransition");

        assert_eq!(ledger.db().tree_names().len(), trees_before);
        assert!(ledger.targets().unwrap().is_empty());
    }
}
