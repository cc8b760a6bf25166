//! On-disk migration artifacts.
//!
//! A migrations directory holds one JSON document per migration, named
//! `<id>_<slug>.json`, plus `snapshot.json` with the snapshot the latest
//! migration was diffed against. The ordered list the planner consumes is
//! built from this directory by the caller; nothing is registered globally.

use super::definition::Migration;
use super::error::MigrationError;
use super::id::MigrationId;
use crate::error::Error;
use crate::snapshot::Snapshot;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

/// Directory of migration artifacts.
#[derive(Debug, Clone)]
pub struct MigrationStore {
    dir: PathBuf,
}

impl MigrationStore {
    /// File holding the latest authored snapshot.
    pub const SNAPSHOT_FILE: &'static str = "snapshot.json";

    /// Open a migrations directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, MigrationError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_error)?;
        Ok(Self { dir })
    }

    /// Load every migration, sorted by id.
    ///
    /// Fails with `DuplicateMigration` if two files carry the same id.
    pub fn load_all(&self) -> Result<Vec<Migration>, MigrationError> {
        let mut migrations = Vec::new();
        for path in self.migration_files()? {
            let bytes = fs::read(&path).map_err(io_error)?;
            let migration: Migration = serde_json::from_slice(&bytes).map_err(Error::from)?;
            migrations.push(migration);
        }

        migrations.sort_by_key(|m| m.id);
        if let Some(pair) = migrations.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(MigrationError::DuplicateMigration {
                migration_id: pair[1].id,
            });
        }
        Ok(migrations)
    }

    /// Persist a new migration. Never overwrites an existing one.
    pub fn save(&self, migration: &Migration) -> Result<PathBuf, MigrationError> {
        if self.load_all()?.iter().any(|m| m.id == migration.id) {
            return Err(MigrationError::DuplicateMigration {
                migration_id: migration.id,
            });
        }

        let path = self
            .dir
            .join(format!("{}_{}.json", migration.id, migration.slug()));
        let json = serde_json::to_vec_pretty(migration).map_err(Error::from)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => MigrationError::DuplicateMigration {
                    migration_id: migration.id,
                },
                _ => io_error(e),
            })?;
        file.write_all(&json).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;

        tracing::debug!(migration_id = %migration.id, path = %path.display(), "migration saved");
        Ok(path)
    }

    /// Allocate an id greater than every stored migration's.
    pub fn next_id(&self) -> Result<MigrationId, MigrationError> {
        let last = self.load_all()?.last().map(|m| m.id);
        Ok(MigrationId::next_after(last))
    }

    /// The snapshot the latest migration was diffed against, if any.
    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>, MigrationError> {
        let path = self.dir.join(Self::SNAPSHOT_FILE);
        match fs::read(&path) {
            Ok(bytes) => {
                let snapshot = serde_json::from_slice(&bytes).map_err(Error::from)?;
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    /// Replace the stored snapshot.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), MigrationError> {
        let path = self.dir.join(Self::SNAPSHOT_FILE);
        let tmp = self.dir.join(format!("{}.tmp", Self::SNAPSHOT_FILE));
        let json = serde_json::to_vec_pretty(snapshot).map_err(Error::from)?;
        fs::write(&tmp, json).map_err(io_error)?;
        fs::rename(&tmp, &path).map_err(io_error)?;
        Ok(())
    }

    fn migration_files(&self) -> Result<Vec<PathBuf>, MigrationError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let is_snapshot = path
                .file_name()
                .is_some_and(|name| name == Self::SNAPSHOT_FILE);
            if path.is_file() && is_json && !is_snapshot {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn io_error(e: std::io::Error) -> MigrationError {
    MigrationError::Storage(Error::Io(e))
}
