//! Column definitions.

use super::types::DataType;
use serde::{Deserialize, Serialize};

/// A column definition within a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name (unique within its table).
    pub name: String,
    /// Semantic data type.
    pub data_type: DataType,
    /// Whether the column accepts nulls.
    pub nullable: bool,
    /// Default value used when an insert omits the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// How the column value is generated, if at all.
    #[serde(default)]
    pub generated: Generated,
}

/// Default value literal for a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Decimal value, kept in its literal form.
    Decimal(String),
    /// Text value.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Current timestamp (evaluated at insert time).
    CurrentTimestamp,
    /// Store-specific expression (evaluated at insert time).
    Expression(String),
}

impl std::fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultValue::Null => write!(f, "NULL"),
            DefaultValue::Bool(b) => write!(f, "{}", b),
            DefaultValue::Integer(i) => write!(f, "{}", i),
            DefaultValue::Decimal(d) => write!(f, "{}", d),
            DefaultValue::Text(s) => write!(f, "'{}'", s),
            DefaultValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            DefaultValue::CurrentTimestamp => write!(f, "CURRENT_TIMESTAMP"),
            DefaultValue::Expression(e) => write!(f, "({})", e),
        }
    }
}

/// Value generation strategy for a column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Generated {
    /// Plain stored column.
    #[default]
    None,
    /// Auto-incrementing identity.
    Identity,
    /// Derived from an expression over other columns.
    Computed {
        /// Expression computing the value.
        expression: String,
    },
}

impl ColumnDef {
    /// Create a new non-nullable column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
            default: None,
            generated: Generated::None,
        }
    }

    /// Create a nullable column.
    pub fn nullable(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, data_type)
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark as an identity column.
    pub fn identity(mut self) -> Self {
        self.generated = Generated::Identity;
        self
    }

    /// Mark as computed from an expression.
    pub fn computed(mut self, expression: impl Into<String>) -> Self {
        self.generated = Generated::Computed {
            expression: expression.into(),
        };
        self
    }

    /// Return a copy with a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Whether existing rows can receive a value for this column without help.
    ///
    /// True for nullable, defaulted and generated columns.
    pub fn can_fill_existing_rows(&self) -> bool {
        self.nullable || self.default.is_some() || self.generated != Generated::None
    }

    /// Whether only the default value differs from `other`.
    pub fn differs_only_in_default(&self, other: &ColumnDef) -> bool {
        self.default != other.default
            && self.name == other.name
            && self.data_type == other.data_type
            && self.nullable == other.nullable
            && self.generated == other.generated
    }
}
