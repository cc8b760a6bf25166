//! Migration identifiers.

use crate::error::Error;
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

/// Length of the storage key encoding of a [`MigrationId`].
pub const MIGRATION_ID_KEY_LEN: usize = 12;

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Monotonically increasing migration identifier: authoring timestamp plus
/// a sequence number that disambiguates ids allocated within one tick.
///
/// Ordering is by timestamp, then sequence. The textual form is
/// `<timestamp>_<sequence>` with the sequence zero-padded to four digits.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId {
    timestamp: u64,
    sequence: u32,
}

/// Error parsing the textual form of a [`MigrationId`].
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("invalid migration id `{0}`: expected <timestamp>[_<sequence>]")]
pub struct ParseMigrationIdError(String);

impl MigrationId {
    /// Build an id from its parts.
    pub const fn new(timestamp: u64, sequence: u32) -> Self {
        Self {
            timestamp,
            sequence,
        }
    }

    /// Authoring timestamp component.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Sequence component.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Allocate an id strictly greater than `last` (if any), based on the clock.
    pub fn next_after(last: Option<MigrationId>) -> Self {
        Self::next_at(current_timestamp(), last)
    }

    fn next_at(now: u64, last: Option<MigrationId>) -> Self {
        match last {
            Some(last) if now <= last.timestamp => match last.sequence.checked_add(1) {
                Some(sequence) => Self::new(last.timestamp, sequence),
                None => Self::new(last.timestamp + 1, 0),
            },
            _ => Self::new(now, 0),
        }
    }

    /// Big-endian key encoding; byte order matches id order.
    pub fn to_key(&self) -> [u8; MIGRATION_ID_KEY_LEN] {
        let mut key = [0u8; MIGRATION_ID_KEY_LEN];
        key[0..8].copy_from_slice(&self.timestamp.to_be_bytes());
        key[8..12].copy_from_slice(&self.sequence.to_be_bytes());
        key
    }

    /// Decode a key produced by [`MigrationId::to_key`].
    pub fn from_key(key: &[u8]) -> Result<Self, Error> {
        if key.len() != MIGRATION_ID_KEY_LEN {
            return Err(Error::InvalidKey);
        }
        let mut timestamp = [0u8; 8];
        let mut sequence = [0u8; 4];
        timestamp.copy_from_slice(&key[0..8]);
        sequence.copy_from_slice(&key[8..12]);
        Ok(Self::new(
            u64::from_be_bytes(timestamp),
            u32::from_be_bytes(sequence),
        ))
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:04}", self.timestamp, self.sequence)
    }
}

impl FromStr for MigrationId {
    type Err = ParseMigrationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMigrationIdError(s.to_string());
        let (timestamp, sequence) = match s.split_once('_') {
            Some((ts, seq)) => (ts, seq),
            None => (s, "0"),
        };
        let timestamp = timestamp.parse::<u64>().map_err(|_| err())?;
        let sequence = sequence.parse::<u32>().map_err(|_| err())?;
        Ok(Self::new(timestamp, sequence))
    }
}

impl TryFrom<String> for MigrationId {
    type Error = ParseMigrationIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.to_string()
    }
}
