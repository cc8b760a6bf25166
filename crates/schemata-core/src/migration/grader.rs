//! Safety grading for migrations.
//!
//! Assigns a safety grade (A/B/C/D) to every operation and to the migration
//! as a whole. Grading only flags; deciding whether to run a destructive
//! migration is left to the caller.

use super::error::SafetyGrade;
use super::operation::Operation;
use crate::snapshot::Generated;

/// Grading result for a single operation.
#[derive(Debug, Clone)]
pub struct ChangeGrade {
    /// The safety grade for this operation.
    pub grade: SafetyGrade,
    /// Description of the operation.
    pub change_description: String,
    /// Reasoning for the grade.
    pub reasoning: String,
    /// Whether existing rows need a value computed for them.
    pub requires_backfill: bool,
    /// Whether data may be lost or must be moved by hand.
    pub requires_data_migration: bool,
}

impl ChangeGrade {
    fn new(grade: SafetyGrade, operation: &Operation, reasoning: impl Into<String>) -> Self {
        Self {
            grade,
            change_description: operation.describe(),
            reasoning: reasoning.into(),
            requires_backfill: false,
            requires_data_migration: false,
        }
    }

    fn with_backfill(mut self) -> Self {
        self.requires_backfill = true;
        self
    }

    fn with_data_migration(mut self) -> Self {
        self.requires_data_migration = true;
        self
    }
}

/// Grading result for a whole operation list.
#[derive(Debug, Clone)]
pub struct MigrationGrade {
    /// The worst grade among all operations (A when there are none).
    pub overall_grade: SafetyGrade,
    /// One grade per operation, in operation order.
    pub change_grades: Vec<ChangeGrade>,
    /// Warnings about the migration as a whole.
    pub warnings: Vec<String>,
}

impl MigrationGrade {
    /// Whether any operation needs existing rows filled in.
    pub fn requires_backfill(&self) -> bool {
        self.change_grades.iter().any(|g| g.requires_backfill)
    }

    /// Whether any operation may lose data.
    pub fn requires_data_migration(&self) -> bool {
        self.change_grades.iter().any(|g| g.requires_data_migration)
    }

    /// Whether any operation is grade D.
    pub fn is_destructive(&self) -> bool {
        self.overall_grade == SafetyGrade::D
    }

    /// Operations graded C or worse.
    pub fn blocking_changes(&self) -> impl Iterator<Item = &ChangeGrade> {
        self.change_grades
            .iter()
            .filter(|g| g.grade >= SafetyGrade::C)
    }
}

/// Grades operation lists for safety.
pub struct SafetyGrader;

impl SafetyGrader {
    /// Grade a list of operations.
    pub fn grade(operations: &[Operation]) -> MigrationGrade {
        let change_grades: Vec<ChangeGrade> =
            operations.iter().map(Self::grade_operation).collect();
        let overall_grade = change_grades
            .iter()
            .map(|g| g.grade)
            .max()
            .unwrap_or(SafetyGrade::A);
        let warnings = Self::generate_warnings(&change_grades, operations);

        MigrationGrade {
            overall_grade,
            change_grades,
            warnings,
        }
    }

    /// Grade a single operation.
    pub fn grade_operation(operation: &Operation) -> ChangeGrade {
        match operation {
            Operation::CreateTable { .. } => ChangeGrade::new(
                SafetyGrade::A,
                operation,
                "Creating tables is non-breaking",
            ),

            Operation::DropTable { .. } => ChangeGrade::new(
                SafetyGrade::D,
                operation,
                "Dropping a table destroys its rows; the inverse restores only the structure",
            )
            .with_data_migration(),

            Operation::AddColumn { column, .. } => {
                if column.nullable {
                    ChangeGrade::new(
                        SafetyGrade::A,
                        operation,
                        "Nullable columns need no value for existing rows",
                    )
                } else if column.can_fill_existing_rows() {
                    ChangeGrade::new(
                        SafetyGrade::B,
                        operation,
                        "Existing rows receive the default or generated value",
                    )
                    .with_backfill()
                } else {
                    ChangeGrade::new(
                        SafetyGrade::C,
                        operation,
                        "Required column without default fails on populated tables",
                    )
                    .with_backfill()
                }
            }

            Operation::DropColumn { .. } => ChangeGrade::new(
                SafetyGrade::D,
                operation,
                "Dropping a column destroys its values",
            )
            .with_data_migration(),

            Operation::AlterColumn { from, to, .. } => {
                if !from.data_type.widens_to(&to.data_type) {
                    ChangeGrade::new(
                        SafetyGrade::D,
                        operation,
                        format!(
                            "Narrowing {} to {} may truncate or reject values",
                            from.data_type, to.data_type
                        ),
                    )
                    .with_data_migration()
                } else if from.nullable && !to.nullable {
                    ChangeGrade::new(
                        SafetyGrade::C,
                        operation,
                        "Existing nulls must be filled before the column becomes required",
                    )
                    .with_backfill()
                } else if from.data_type != to.data_type || from.generated != to.generated {
                    ChangeGrade::new(
                        SafetyGrade::C,
                        operation,
                        "Type or generation changes require rewriting the column",
                    )
                    .with_backfill()
                } else {
                    ChangeGrade::new(
                        SafetyGrade::A,
                        operation,
                        "Relaxing a column is non-breaking",
                    )
                }
            }

            Operation::RenameColumn { .. } => ChangeGrade::new(
                SafetyGrade::C,
                operation,
                "Readers using the old column name break",
            ),

            Operation::AddIndex { index, .. } => {
                let grade = ChangeGrade::new(
                    SafetyGrade::B,
                    operation,
                    if index.unique {
                        "Unique index build scans and validates existing rows"
                    } else {
                        "Index build scans existing rows"
                    },
                );
                if index.unique {
                    grade.with_backfill()
                } else {
                    grade
                }
            }

            Operation::DropIndex { .. } => ChangeGrade::new(
                SafetyGrade::A,
                operation,
                "Dropping an index loses no data",
            ),

            Operation::SetDefaultValue { .. } => ChangeGrade::new(
                SafetyGrade::A,
                operation,
                "Defaults apply to future inserts only",
            ),

            Operation::SetPrimaryKey { .. } => ChangeGrade::new(
                SafetyGrade::C,
                operation,
                "Changing the primary key rebuilds the table identity",
            )
            .with_data_migration(),
        }
    }

    fn generate_warnings(grades: &[ChangeGrade], operations: &[Operation]) -> Vec<String> {
        let mut warnings = Vec::new();

        let destructive_count = grades.iter().filter(|g| g.grade == SafetyGrade::D).count();
        if destructive_count > 1 {
            warnings.push(format!(
                "Multiple destructive changes ({}) detected - consider breaking into smaller migrations",
                destructive_count
            ));
        }

        for operation in operations {
            if let Operation::AlterColumn { from, to, table } = operation {
                if from.generated == Generated::Identity && to.generated != Generated::Identity {
                    warnings.push(format!(
                        "{}.{} stops being an identity column; inserts must supply values",
                        table, to.name
                    ));
                }
            }
        }

        let renames = operations
            .iter()
            .filter(|op| matches!(op, Operation::RenameColumn { .. }))
            .count();
        if renames > 0 {
            warnings.push(format!(
                "{} column rename(s) - deploy readers of the new names together with this migration",
                renames
            ));
        }

        warnings
    }
}
