//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use schemata_core::migration::{
    DiffWarning, Direction, Migration, MigrationId, MigrationStatus, PlanReport, StatusRow,
};
use schemata_core::SafetyGrade;
use std::path::Path;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format a newly saved migration.
    fn format_created(&self, migration: &Migration, path: &Path, warnings: &[DiffWarning])
        -> String;

    /// Format the outcome of an apply or revert run.
    fn format_report(&self, report: &PlanReport) -> String;

    /// Format the status of every known migration on a target.
    fn format_status(&self, target: &str, rows: &[StatusRow]) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_created(
        &self,
        migration: &Migration,
        path: &Path,
        warnings: &[DiffWarning],
    ) -> String {
        let grade = migration.grade();
        let mut output = format!(
            "Created migration {} ({})\n  file:  {}\n  grade: {}\n",
            migration.id,
            migration.name,
            path.display(),
            grade.overall_grade
        );

        if migration.up_ops.is_empty() {
            output.push_str("\nNo operations");
        } else {
            let mut table = Table::new();
            table.set_header(vec!["#", "Operation", "Grade", "Reason"]);
            for (index, change) in grade.change_grades.iter().enumerate() {
                table.add_row(vec![
                    Cell::new(index),
                    Cell::new(&change.change_description),
                    Cell::new(change.grade),
                    Cell::new(&change.reasoning),
                ]);
            }
            output.push('\n');
            output.push_str(&table.to_string());
        }

        let notes = grade
            .warnings
            .iter()
            .cloned()
            .chain(warnings.iter().map(ToString::to_string));
        for note in notes {
            output.push_str(&format!("\nwarning: {}", note));
        }
        if grade.requires_backfill() {
            output.push_str("\nnote: existing rows need values for new or changed columns");
        }
        if grade.requires_data_migration() {
            output.push_str("\nnote: reverting or applying may lose data");
        }
        output
    }

    fn format_report(&self, report: &PlanReport) -> String {
        let verb = match report.direction {
            Direction::Forward => "Applied",
            Direction::Backward => "Reverted",
        };
        if report.completed.is_empty() && report.is_success() && !report.cancelled {
            return format!("Nothing to do on `{}`", report.target);
        }

        let mut output = format!(
            "{} {} migration(s) on `{}`",
            verb,
            report.succeeded(),
            report.target
        );
        if report.skipped_no_ops > 0 {
            output.push_str(&format!(" ({} without operations)", report.skipped_no_ops));
        }
        for id in &report.completed {
            output.push_str(&format!("\n  {}", id));
        }
        if report.cancelled {
            output.push_str("\nStopped: cancelled");
        }
        if let Some(error) = &report.error {
            output.push_str(&format!("\nStopped: {}", error.kind()));
        }
        output
    }

    fn format_status(&self, target: &str, rows: &[StatusRow]) -> String {
        if rows.is_empty() {
            return "No migrations".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Migration", "Name", "Status", "Applied at", "Operations"]);
        for row in rows {
            table.add_row(vec![
                Cell::new(row.id),
                Cell::new(&row.name),
                Cell::new(row.status),
                Cell::new(row.applied_at.map(format_timestamp).unwrap_or_default()),
                Cell::new(row.operations),
            ]);
        }

        let pending = rows
            .iter()
            .filter(|r| r.status == MigrationStatus::Pending)
            .count();
        format!("Target `{}`: {} pending\n{}", target, pending, table)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_created(
        &self,
        migration: &Migration,
        path: &Path,
        warnings: &[DiffWarning],
    ) -> String {
        let grade = migration.grade();
        let operations: Vec<serde_json::Value> = grade
            .change_grades
            .iter()
            .map(|change| {
                serde_json::json!({
                    "operation": change.change_description,
                    "grade": grade_letter(change.grade),
                    "reason": change.reasoning,
                })
            })
            .collect();

        serde_json::json!({
            "id": migration.id,
            "name": migration.name,
            "file": path.display().to_string(),
            "checksum": migration.checksum_hex(),
            "grade": grade_letter(grade.overall_grade),
            "requires_backfill": grade.requires_backfill(),
            "requires_data_migration": grade.requires_data_migration(),
            "operations": operations,
            "warnings": grade
                .warnings
                .iter()
                .cloned()
                .chain(warnings.iter().map(ToString::to_string))
                .collect::<Vec<_>>(),
        })
        .to_string()
    }

    fn format_report(&self, report: &PlanReport) -> String {
        serde_json::json!({
            "target": report.target,
            "direction": report.direction.to_string(),
            "completed": report.completed.iter().map(MigrationId::to_string).collect::<Vec<_>>(),
            "skipped_no_ops": report.skipped_no_ops,
            "cancelled": report.cancelled,
            "error": report.error.as_ref().map(|e| serde_json::json!({
                "kind": e.kind(),
                "message": e.to_string(),
            })),
        })
        .to_string()
    }

    fn format_status(&self, target: &str, rows: &[StatusRow]) -> String {
        let migrations: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "id": row.id,
                    "name": row.name,
                    "status": row.status.to_string(),
                    "applied_at": row.applied_at.map(format_timestamp),
                    "operations": row.operations,
                })
            })
            .collect();

        serde_json::json!({
            "target": target,
            "migrations": migrations,
        })
        .to_string()
    }
}

/// Render a microsecond timestamp as UTC.
fn format_timestamp(micros: u64) -> String {
    i64::try_from(micros)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_micros)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn grade_letter(grade: SafetyGrade) -> &'static str {
    match grade {
        SafetyGrade::A => "A",
        SafetyGrade::B => "B",
        SafetyGrade::C => "C",
        SafetyGrade::D => "D",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<StatusRow> {
        vec![
            StatusRow {
                id: MigrationId::new(1, 0),
                name: "first".into(),
                status: MigrationStatus::Applied,
                applied_at: Some(1_700_000_000_000_000),
                operations: 2,
            },
            StatusRow {
                id: MigrationId::new(2, 0),
                name: "second".into(),
                status: MigrationStatus::Pending,
                applied_at: None,
                operations: 1,
            },
        ]
    }

    #[test]
    fn test_table_status() {
        let output = TableFormatter.format_status("prod", &rows());
        assert!(output.starts_with("Target `prod`: 1 pending"));
        assert!(output.contains("2023-11-14 22:13:20 UTC"));
        assert!(output.contains("pending"));
    }

    #[test]
    fn test_json_status() {
        let output = JsonFormatter.format_status("prod", &rows());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["target"], "prod");
        assert_eq!(value["migrations"][0]["id"], "1_0000");
        assert_eq!(value["migrations"][1]["status"], "pending");
        assert!(value["migrations"][1]["applied_at"].is_null());
    }

    #[test]
    fn test_report_formats() {
        let mut report = PlanReport {
            target: "prod".into(),
            direction: Direction::Forward,
            completed: vec![],
            skipped_no_ops: 0,
            cancelled: false,
            error: None,
        };
        assert_eq!(TableFormatter.format_report(&report), "Nothing to do on `prod`");

        report.completed.push(MigrationId::new(3, 1));
        report.error = Some(schemata_core::MigrationError::TargetBusy {
            target: "prod".into(),
        });
        let table = TableFormatter.format_report(&report);
        assert!(table.starts_with("Applied 1 migration(s) on `prod`"));
        assert!(table.ends_with("Stopped: TargetBusy"));

        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_report(&report)).unwrap();
        assert_eq!(json["completed"][0], "3_0001");
        assert_eq!(json["error"]["kind"], "TargetBusy");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(
            OutputFormat::from_str("json", true).unwrap(),
            OutputFormat::Json
        );
        assert_eq!(OutputFormat::Table.to_string(), "table");
    }
}
