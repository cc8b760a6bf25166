//! Semantic column data types.

use serde::{Deserialize, Serialize};

/// Semantic data type of a column.
///
/// Types carry their precision where it matters for deciding whether a
/// type change widens (safe) or narrows (potentially lossy) the column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataType {
    /// Signed integer of the given bit width (8, 16, 32 or 64).
    Integer {
        /// Width in bits.
        bits: u8,
    },
    /// UTF-8 text, optionally bounded.
    Text {
        /// Maximum length in characters; `None` means unbounded.
        max_length: Option<u32>,
    },
    /// Fixed-precision decimal.
    Decimal {
        /// Total number of digits.
        precision: u8,
        /// Number of digits after the decimal point.
        scale: u8,
    },
    /// Boolean value.
    Boolean,
    /// Point in time.
    DateTime {
        /// Whether the value carries a timezone offset.
        with_timezone: bool,
    },
    /// Binary data, optionally bounded.
    Binary {
        /// Maximum length in bytes; `None` means unbounded.
        max_length: Option<u32>,
    },
}

impl DataType {
    /// 32-bit integer.
    pub fn integer() -> Self {
        DataType::Integer { bits: 32 }
    }

    /// 64-bit integer.
    pub fn big_integer() -> Self {
        DataType::Integer { bits: 64 }
    }

    /// Unbounded text.
    pub fn text() -> Self {
        DataType::Text { max_length: None }
    }

    /// Text bounded to `max_length` characters.
    pub fn varchar(max_length: u32) -> Self {
        DataType::Text {
            max_length: Some(max_length),
        }
    }

    /// Decimal with the given precision and scale.
    pub fn decimal(precision: u8, scale: u8) -> Self {
        DataType::Decimal { precision, scale }
    }

    /// Timestamp without timezone.
    pub fn datetime() -> Self {
        DataType::DateTime {
            with_timezone: false,
        }
    }

    /// Unbounded binary.
    pub fn binary() -> Self {
        DataType::Binary { max_length: None }
    }

    /// Whether every value of `self` is representable in `other` without loss.
    pub fn widens_to(&self, other: &DataType) -> bool {
        match (self, other) {
            (DataType::Integer { bits: a }, DataType::Integer { bits: b }) => a <= b,
            (DataType::Integer { bits }, DataType::Decimal { precision, scale }) => {
                let digits = integer_digits(*bits);
                precision.saturating_sub(*scale) >= digits
            }
            (DataType::Text { max_length: a }, DataType::Text { max_length: b })
            | (DataType::Binary { max_length: a }, DataType::Binary { max_length: b }) => {
                bound_widens(*a, *b)
            }
            (
                DataType::Decimal {
                    precision: p1,
                    scale: s1,
                },
                DataType::Decimal {
                    precision: p2,
                    scale: s2,
                },
            ) => s2 >= s1 && (p2 - s2.min(p2)) >= (p1 - s1.min(p1)),
            (DataType::Boolean, DataType::Boolean) => true,
            (DataType::DateTime { with_timezone: a }, DataType::DateTime { with_timezone: b }) => {
                !a || *b
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Integer { bits } => write!(f, "int{}", bits),
            DataType::Text { max_length: None } => write!(f, "text"),
            DataType::Text {
                max_length: Some(n),
            } => write!(f, "varchar({})", n),
            DataType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            DataType::Boolean => write!(f, "boolean"),
            DataType::DateTime {
                with_timezone: false,
            } => write!(f, "datetime"),
            DataType::DateTime {
                with_timezone: true,
            } => write!(f, "datetimetz"),
            DataType::Binary { max_length: None } => write!(f, "binary"),
            DataType::Binary {
                max_length: Some(n),
            } => write!(f, "varbinary({})", n),
        }
    }
}

fn bound_widens(from: Option<u32>, to: Option<u32>) -> bool {
    match (from, to) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => a <= b,
    }
}

/// Decimal digits needed to hold any signed integer of the given width.
fn integer_digits(bits: u8) -> u8 {
    match bits {
        0..=8 => 3,
        9..=16 => 5,
        17..=32 => 10,
        _ => 19,
    }
}
