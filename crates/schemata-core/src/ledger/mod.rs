//! History ledger: which migrations have been applied to which target.
//!
//! The ledger is the single source of truth for applied state. Entries for
//! a target are strictly ordered by migration id, may only be appended
//! after the current head, and may only be removed from the head. Together
//! this keeps the applied set a prefix of the known migration sequence.

mod memory;
mod sled_ledger;

pub use memory::MemoryLedger;
pub use sled_ledger::SledLedger;

use crate::error::Error;
use crate::migration::{current_timestamp, Migration, MigrationError, MigrationId, CHECKSUM_LEN};
use rkyv::{Archive, Deserialize, Serialize};

/// Record of one applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Applied migration.
    pub migration_id: MigrationId,
    /// Migration name at apply time.
    pub name: String,
    /// When it was applied (microseconds since epoch).
    pub applied_at: u64,
    /// Checksum of the migration as applied.
    pub checksum: [u8; CHECKSUM_LEN],
}

impl LedgerEntry {
    /// Entry for `migration`, stamped now.
    pub fn new(migration: &Migration) -> Self {
        Self {
            migration_id: migration.id,
            name: migration.name.clone(),
            applied_at: current_timestamp(),
            checksum: migration.checksum(),
        }
    }

    /// Serialize the entry to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize an entry from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Durable, per-target record of applied migrations.
pub trait HistoryLedger: Send + Sync {
    /// Entries for `target`, in ascending id order.
    fn entries(&self, target: &str) -> Result<Vec<LedgerEntry>, MigrationError>;

    /// Append `entry` to `target`.
    ///
    /// Fails with `OutOfOrderApplication` unless the id is strictly greater
    /// than the last recorded one.
    fn record_applied(&self, target: &str, entry: LedgerEntry) -> Result<(), MigrationError>;

    /// Remove `id`, which must be the most recent entry of `target`.
    ///
    /// Fails with `NotLatestMigration` if a later migration is applied and
    /// with `InvalidTransition` if `id` was never applied. The ledger is
    /// unchanged on failure.
    fn record_reverted(&self, target: &str, id: MigrationId)
        -> Result<LedgerEntry, MigrationError>;

    /// Targets with at least one entry.
    fn targets(&self) -> Result<Vec<String>, MigrationError>;

    /// Applied ids for `target`, ascending.
    fn applied_ids(&self, target: &str) -> Result<Vec<MigrationId>, MigrationError> {
        Ok(self
            .entries(target)?
            .into_iter()
            .map(|e| e.migration_id)
            .collect())
    }

    /// Most recent entry for `target`.
    fn last_applied(&self, target: &str) -> Result<Option<LedgerEntry>, MigrationError> {
        Ok(self.entries(target)?.pop())
    }

    /// Known migrations newer than the last applied one, ascending.
    fn pending<'m>(
        &self,
        target: &str,
        known: &'m [Migration],
    ) -> Result<Vec<&'m Migration>, MigrationError> {
        let last = self.last_applied(target)?.map(|e| e.migration_id);
        let mut pending: Vec<&Migration> = known
            .iter()
            .filter(|m| last.map_or(true, |last| m.id > last))
            .collect();
        pending.sort_by_key(|m| m.id);
        Ok(pending)
    }
}

/// Check an append against the current head.
pub(crate) fn check_append(
    target: &str,
    last: Option<MigrationId>,
    id: MigrationId,
) -> Result<(), MigrationError> {
    match last {
        Some(last) if id <= last => Err(MigrationError::OutOfOrderApplication {
            target: target.to_string(),
            migration_id: id,
            last_applied: last,
        }),
        _ => Ok(()),
    }
}

/// Check a removal against the current entries.
pub(crate) fn check_revert(
    target: &str,
    ids: &[MigrationId],
    id: MigrationId,
) -> Result<(), MigrationError> {
    match ids.last() {
        Some(last) if *last == id => Ok(()),
        latest if ids.contains(&id) => Err(MigrationError::NotLatestMigration {
            target: target.to_string(),
            migration_id: id,
            latest: latest.copied(),
        }),
        _ => Err(MigrationError::InvalidTransition {
            target: target.to_string(),
            migration_id: id,
            reason: "migration is not applied".to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn migration(ts: u64) -> Migration {
        Migration::new(MigrationId::new(ts, 0), format!("m{}", ts), vec![], vec![])
    }

    /// Contract checks shared by every ledger implementation.
    pub(crate) fn exercise_ledger<L: HistoryLedger>(ledger: &L) {
        let known: Vec<Migration> = (1..=5).map(migration).collect();

        assert!(ledger.entries("prod").unwrap().is_empty());
        assert!(ledger.last_applied("prod").unwrap().is_none());

        for m in &known[..3] {
            ledger.record_applied("prod", LedgerEntry::new(m)).unwrap();
        }
        assert_eq!(
            ledger.applied_ids("prod").unwrap(),
            known[..3].iter().map(|m| m.id).collect::<Vec<_>>()
        );

        // Pending is exactly the suffix after the head.
        let pending: Vec<MigrationId> = ledger
            .pending("prod", &known)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(pending, vec![known[3].id, known[4].id]);

        // Appending at or before the head is rejected.
        let err = ledger
            .record_applied("prod", LedgerEntry::new(&known[1]))
            .unwrap_err();
        assert_eq!(err.kind(), "OutOfOrderApplication");
        let err = ledger
            .record_applied("prod", LedgerEntry::new(&known[2]))
            .unwrap_err();
        assert_eq!(err.kind(), "OutOfOrderApplication");

        // Only the head can be removed.
        let err = ledger.record_reverted("prod", known[0].id).unwrap_err();
        assert_eq!(err.kind(), "NotLatestMigration");
        let err = ledger.record_reverted("prod", known[4].id).unwrap_err();
        assert_eq!(err.kind(), "InvalidTransition");
        assert_eq!(ledger.applied_ids("prod").unwrap().len(), 3);

        let removed = ledger.record_reverted("prod", known[2].id).unwrap();
        assert_eq!(removed.migration_id, known[2].id);
        assert_eq!(removed.checksum, known[2].checksum());
        assert_eq!(
            ledger.last_applied("prod").unwrap().map(|e| e.migration_id),
            Some(known[1].id)
        );

        // Targets are independent.
        ledger
            .record_applied("staging", LedgerEntry::new(&known[0]))
            .unwrap();
        assert_eq!(ledger.applied_ids("staging").unwrap().len(), 1);
        assert_eq!(ledger.applied_ids("prod").unwrap().len(), 2);

        let mut targets = ledger.targets().unwrap();
        targets.sort();
        assert_eq!(targets, vec!["prod".to_string(), "staging".to_string()]);
    }

    #[test]
    fn test_entry_bytes_roundtrip() {
        let entry = LedgerEntry::new(&migration(42));
        let bytes = entry.to_bytes().unwrap();
        assert_eq!(LedgerEntry::from_bytes(&bytes).unwrap(), entry);
        assert!(LedgerEntry::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_check_revert_on_empty_ledger() {
        let err = check_revert("t", &[], MigrationId::new(1, 0)).unwrap_err();
        assert_eq!(err.kind(), "InvalidTransition");
    }
}
