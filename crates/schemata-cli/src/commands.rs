//! Subcommand implementations.
//!
//! Each command returns the text to print on success. Errors travel up to
//! `main`, which is the only place that renders them.

use crate::config::{CliConfig, RevertTarget};
use crate::error::CliError;
use crate::formatter::Formatter;
use schemata_core::ledger::{HistoryLedger, SledLedger};
use schemata_core::migration::{
    CancellationToken, Migration, MigrationExecutor, MigrationId, MigrationStore, Plan, Planner,
    RenameHints, SchemaDiff,
};
use schemata_core::snapshot::Snapshot;
use schemata_core::target::SledTarget;
use schemata_core::{Error, MigrationError};
use std::path::Path;
use std::sync::Arc;

/// Options for `create-migration`.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Migration name.
    pub name: String,
    /// Rename hints as `TABLE.OLD=NEW`.
    pub renames: Vec<String>,
    /// Keep going when the diff has warnings.
    pub accept_incompatible: bool,
    /// Save a migration with no operations.
    pub allow_empty: bool,
}

/// Diff `snapshot_path` against the latest snapshot and save a migration.
pub fn create_migration(
    config: &CliConfig,
    snapshot_path: &Path,
    options: &CreateOptions,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let after = read_snapshot(snapshot_path)?;
    let store = MigrationStore::open(&config.migrations_dir)?;
    let before = store
        .latest_snapshot()?
        .unwrap_or_else(|| Snapshot::empty(after.name(), 0));

    let mut hints = RenameHints::new();
    for raw in &options.renames {
        let (table, from, to) = parse_rename(raw)?;
        hints.insert(table, from, to);
    }

    let outcome = SchemaDiff::compute(&before, &after, &hints)?;
    let warnings = outcome.warnings().to_vec();
    let diff = if options.accept_incompatible {
        for warning in &warnings {
            tracing::warn!(warning = %warning, "accepted incompatible change");
        }
        outcome.accept_with_warnings()
    } else {
        outcome.accept()?
    };
    if diff.is_empty() && !options.allow_empty {
        return Err(CliError::NoChanges);
    }

    let migration = Migration::from_diff(store.next_id()?, &options.name, diff);
    let path = store.save(&migration)?;
    store.save_snapshot(&after)?;
    tracing::info!(
        migration_id = %migration.id,
        operations = migration.up_ops.len(),
        "migration created"
    );

    Ok(formatter.format_created(&migration, &path, &warnings))
}

/// Apply pending migrations, up to `to` if given.
pub fn apply(
    config: &CliConfig,
    to: Option<MigrationId>,
    allow_destructive: bool,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let session = Session::open(config)?;
    let plan = session.planner.plan_forward(
        &config.target,
        &session.ledger.entries(&config.target)?,
        to,
    )?;

    let grade = plan.grade();
    if grade.is_destructive() && !allow_destructive {
        let changes = grade
            .change_grades
            .iter()
            .filter(|g| g.grade == schemata_core::SafetyGrade::D)
            .map(|g| g.change_description.clone())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(CliError::DestructivePlan { changes });
    }

    session.run(&plan, formatter)
}

/// Revert applied migrations newer than `to`.
pub fn revert(
    config: &CliConfig,
    to: RevertTarget,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let session = Session::open(config)?;
    let plan = session.planner.plan_rollback(
        &config.target,
        &session.ledger.entries(&config.target)?,
        to.migration_id(),
    )?;
    session.run(&plan, formatter)
}

/// Report every known migration with its state on the target.
///
/// Reads the ledger only, so querying an unknown target changes nothing.
pub fn status(config: &CliConfig, formatter: &dyn Formatter) -> Result<String, CliError> {
    let planner = load_planner(config)?;
    let ledger = SledLedger::open_path(&config.data_path)?;
    let rows = planner.status(&ledger.entries(&config.target)?)?;
    Ok(formatter.format_status(&config.target, &rows))
}

fn load_planner(config: &CliConfig) -> Result<Planner, CliError> {
    let store = MigrationStore::open(&config.migrations_dir)?;
    Ok(Planner::new(store.load_all()?)?
        .with_checksum_verification(config.executor.verify_checksums))
}

/// Everything a command needs to plan and run against the configured target.
struct Session {
    planner: Planner,
    ledger: Arc<SledLedger>,
    target: SledTarget,
    executor: MigrationExecutor<SledLedger>,
}

impl Session {
    fn open(config: &CliConfig) -> Result<Self, CliError> {
        let planner = load_planner(config)?;
        let ledger = Arc::new(SledLedger::open_path(&config.data_path)?);
        let target = SledTarget::open(ledger.db(), config.target.as_str())
            .map_err(MigrationError::from)?;
        let executor = MigrationExecutor::new(Arc::clone(&ledger), config.executor.clone());

        Ok(Self {
            planner,
            ledger,
            target,
            executor,
        })
    }

    /// Execute `plan`. A partial run is printed before its error is returned.
    fn run(&self, plan: &Plan, formatter: &dyn Formatter) -> Result<String, CliError> {
        tracing::info!(
            target_id = %plan.target,
            direction = %plan.direction,
            migrations = plan.len(),
            "running plan"
        );
        let report = self
            .executor
            .execute(&self.target, plan, &CancellationToken::new());
        let output = formatter.format_report(&report);
        self.ledger.flush()?;

        match report.into_result() {
            Ok(_) => Ok(output),
            Err(e) => {
                println!("{}", output);
                Err(e.into())
            }
        }
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot, CliError> {
    let invalid = |reason: String| CliError::InvalidInput {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| invalid(Error::from(e).to_string()))
}

/// Split `TABLE.OLD=NEW`.
fn parse_rename(raw: &str) -> Result<(String, String, String), CliError> {
    let invalid = || CliError::InvalidRename(raw.to_string());
    let (column, to) = raw.split_once('=').ok_or_else(invalid)?;
    let (table, from) = column.split_once('.').ok_or_else(invalid)?;
    let (table, from, to) = (table.trim(), from.trim(), to.trim());
    if table.is_empty() || from.is_empty() || to.is_empty() {
        return Err(invalid());
    }
    Ok((table.to_string(), from.to_string(), to.to_string()))
}
