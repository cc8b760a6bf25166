//! Migrations: identified, reversible operation lists.

use super::diff::SchemaDiff;
use super::grader::{MigrationGrade, SafetyGrader};
use super::id::MigrationId;
use super::operation::Operation;
use serde::{Deserialize, Serialize};

/// Length of a migration checksum.
pub const CHECKSUM_LEN: usize = 32;

/// A named, ordered, reversible set of structural operations.
///
/// Created from a diff and optionally hand-edited through
/// [`Migration::with_overrides`] before it is persisted. Once a target has
/// applied it, it must not change; the ledger stores its checksum to catch
/// edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Ordering identity.
    pub id: MigrationId,
    /// Human label.
    pub name: String,
    /// Schema version the migration starts from.
    #[serde(default)]
    pub from_version: u64,
    /// Schema version the migration produces.
    #[serde(default)]
    pub to_version: u64,
    /// Operations run by apply, in order.
    pub up_ops: Vec<Operation>,
    /// Operations run by revert, in order.
    pub down_ops: Vec<Operation>,
    /// Whether the operations were edited by hand after diffing.
    #[serde(default)]
    pub overridden: bool,
}

#[derive(Serialize)]
struct ChecksumInput<'a> {
    id: MigrationId,
    up_ops: &'a [Operation],
    down_ops: &'a [Operation],
}

impl Migration {
    /// Create a migration from explicit operation lists.
    pub fn new(
        id: MigrationId,
        name: impl Into<String>,
        up_ops: Vec<Operation>,
        down_ops: Vec<Operation>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            from_version: 0,
            to_version: 0,
            up_ops,
            down_ops,
            overridden: false,
        }
    }

    /// Create a migration from an accepted diff.
    pub fn from_diff(id: MigrationId, name: impl Into<String>, diff: SchemaDiff) -> Self {
        Self {
            from_version: diff.from_version,
            to_version: diff.to_version,
            ..Self::new(id, name, diff.up_ops, diff.down_ops)
        }
    }

    /// Replace the generated operations with hand-written ones.
    pub fn with_overrides(mut self, up_ops: Vec<Operation>, down_ops: Vec<Operation>) -> Self {
        self.up_ops = up_ops;
        self.down_ops = down_ops;
        self.overridden = true;
        self
    }

    /// Whether applying the migration changes nothing.
    pub fn is_empty(&self) -> bool {
        self.up_ops.is_empty() && self.down_ops.is_empty()
    }

    /// blake3 hash of the id and both operation lists.
    pub fn checksum(&self) -> [u8; CHECKSUM_LEN] {
        let input = ChecksumInput {
            id: self.id,
            up_ops: &self.up_ops,
            down_ops: &self.down_ops,
        };
        // Serializing plain data into a Vec cannot fail.
        let bytes = serde_json::to_vec(&input).unwrap_or_default();
        *blake3::hash(&bytes).as_bytes()
    }

    /// Hex form of [`Migration::checksum`].
    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum())
    }

    /// Safety grade of the forward operations.
    pub fn grade(&self) -> MigrationGrade {
        SafetyGrader::grade(&self.up_ops)
    }

    /// Lowercase, underscore-separated form of the name for file names.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.name.len());
        let mut pending_sep = false;
        for c in self.name.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_sep && !slug.is_empty() {
                    slug.push('_');
                }
                pending_sep = false;
                slug.push(c.to_ascii_lowercase());
            } else {
                pending_sep = true;
            }
        }
        if slug.is_empty() {
            slug.push_str("migration");
        }
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ColumnDef, DataType};

    fn add_address() -> Operation {
        Operation::AddColumn {
            table: "Employees".into(),
            column: ColumnDef::nullable("Address", DataType::text()),
            position: None,
        }
    }

    fn migration() -> Migration {
        Migration::new(
            MigrationId::new(1, 0),
            "Add employee address",
            vec![add_address()],
            vec![add_address().inverse()],
        )
    }

    #[test]
    fn test_checksum_is_stable_and_sensitive() {
        let m = migration();
        assert_eq!(m.checksum(), migration().checksum());
        assert_eq!(m.checksum_hex().len(), 64);

        let edited = m.clone().with_overrides(vec![], vec![]);
        assert_ne!(edited.checksum(), m.checksum());
        assert!(edited.overridden);
        assert!(edited.is_empty());

        let mut renamed = migration();
        renamed.name = "Something else".into();
        assert_eq!(renamed.checksum(), m.checksum());
    }

    #[test]
    fn test_slug() {
        assert_eq!(migration().slug(), "add_employee_address");

        let mut m = migration();
        m.name = "  --Drop  Audit!! ".into();
        assert_eq!(m.slug(), "drop_audit");
        m.name = "???".into();
        assert_eq!(m.slug(), "migration");
    }

    #[test]
    fn test_json_roundtrip() {
        let m = migration();
        let json = serde_json::to_string_pretty(&m).unwrap();
        let back: Migration = serde_json::from_str(&json).unwrap();

        assert_eq!(back, m);
        assert_eq!(back.checksum(), m.checksum());
    }
}
