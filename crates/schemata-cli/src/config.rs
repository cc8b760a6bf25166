//! CLI configuration.

use crate::formatter::OutputFormat;
use clap::{Parser, Subcommand};
use schemata_core::migration::{MigrationId, ParseMigrationIdError};
use schemata_core::ExecutorConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default directory holding migration artifacts.
pub const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";

/// Default sled database holding the ledger and the target schema.
pub const DEFAULT_DATA_PATH: &str = "./schemata_data";

/// Default target identifier.
pub const DEFAULT_TARGET: &str = "default";

/// Default connection acquisition timeout in seconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Directory of migration artifacts.
    pub migrations_dir: PathBuf,

    /// Path to the sled database.
    pub data_path: PathBuf,

    /// Target the ledger entries are recorded for.
    pub target: String,

    /// Output format.
    pub format: OutputFormat,

    /// Executor settings.
    pub executor: ExecutorConfig,
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "schemata")]
#[command(version, about = "Structural schema migrations", long_about = None)]
pub struct Args {
    /// Directory holding migration files and the latest snapshot.
    #[arg(short, long, global = true, default_value = DEFAULT_MIGRATIONS_DIR)]
    pub migrations_dir: PathBuf,

    /// Path to the database holding the ledger and the target schema.
    #[arg(short, long, global = true, default_value = DEFAULT_DATA_PATH)]
    pub data_path: PathBuf,

    /// Target identifier.
    #[arg(short, long, global = true, default_value = DEFAULT_TARGET)]
    pub target: String,

    /// Output format.
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Connection acquisition timeout in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS)]
    pub acquire_timeout: u64,

    /// Skip checksum verification of applied migrations.
    #[arg(long, global = true)]
    pub no_verify_checksums: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Diff a snapshot against the latest one and save the migration.
    CreateMigration {
        /// Human label for the migration.
        name: String,

        /// JSON file with the new snapshot.
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Column rename hint, repeatable.
        #[arg(long = "rename", value_name = "TABLE.OLD=NEW")]
        renames: Vec<String>,

        /// Save the migration even if the diff carries warnings.
        #[arg(long)]
        accept_incompatible: bool,

        /// Save a migration with no operations.
        #[arg(long)]
        allow_empty: bool,
    },

    /// Apply pending migrations, optionally stopping at one.
    Apply {
        /// Last migration to apply.
        to: Option<MigrationId>,

        /// Apply even if the plan drops tables, columns or narrows types.
        #[arg(long)]
        allow_destructive: bool,
    },

    /// Revert applied migrations newer than a migration, or all of them.
    Revert {
        /// Migration to keep as the newest applied one, or `initial`.
        to: RevertTarget,
    },

    /// Show every known migration and whether it is applied.
    Status,
}

/// Where a revert stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertTarget {
    /// Revert everything.
    Initial,
    /// Keep this migration and everything before it.
    Migration(MigrationId),
}

impl RevertTarget {
    /// The migration to stop at, `None` for the initial state.
    pub fn migration_id(self) -> Option<MigrationId> {
        match self {
            RevertTarget::Initial => None,
            RevertTarget::Migration(id) => Some(id),
        }
    }
}

impl FromStr for RevertTarget {
    type Err = ParseMigrationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("initial") {
            return Ok(RevertTarget::Initial);
        }
        s.parse().map(RevertTarget::Migration)
    }
}

impl Args {
    /// Convert command-line arguments to CLI configuration.
    pub fn into_config(self) -> CliConfig {
        let executor = ExecutorConfig::default()
            .with_acquire_timeout(Duration::from_secs(self.acquire_timeout))
            .with_checksum_verification(!self.no_verify_checksums);

        CliConfig {
            migrations_dir: self.migrations_dir,
            data_path: self.data_path,
            target: self.target,
            format: self.format,
            executor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["schemata", "status"]);
        assert!(matches!(args.command, Command::Status));

        let config = args.into_config();
        assert_eq!(config.migrations_dir, PathBuf::from(DEFAULT_MIGRATIONS_DIR));
        assert_eq!(config.data_path, PathBuf::from(DEFAULT_DATA_PATH));
        assert_eq!(config.target, DEFAULT_TARGET);
        assert_eq!(config.format, OutputFormat::Table);
        assert_eq!(config.executor.acquire_timeout, Duration::from_secs(30));
        assert!(config.executor.verify_checksums);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "schemata",
            "apply",
            "1700000000_0002",
            "--allow-destructive",
            "--target",
            "staging",
            "--format",
            "json",
            "--acquire-timeout",
            "5",
        ]);
        match &args.command {
            Command::Apply {
                to,
                allow_destructive,
            } => {
                assert_eq!(*to, Some(MigrationId::new(1_700_000_000, 2)));
                assert!(allow_destructive);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let config = args.into_config();
        assert_eq!(config.target, "staging");
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.executor.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_create_migration_args() {
        let args = Args::parse_from([
            "schemata",
            "create-migration",
            "rename name",
            "--snapshot",
            "next.json",
            "--rename",
            "Employees.Name=FullName",
            "--rename",
            "Employees.Pay=Salary",
        ]);
        let Command::CreateMigration { name, renames, .. } = args.command else {
            panic!("expected create-migration");
        };
        assert_eq!(name, "rename name");
        assert_eq!(renames.len(), 2);
    }

    #[test]
    fn test_revert_target() {
        assert_eq!("initial".parse::<RevertTarget>().unwrap(), RevertTarget::Initial);
        assert_eq!(
            "42_0001".parse::<RevertTarget>().unwrap().migration_id(),
            Some(MigrationId::new(42, 1))
        );
        assert!("yesterday".parse::<RevertTarget>().is_err());
    }
}
