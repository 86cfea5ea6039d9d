//! Per-column escaping rules for dumped row values.
//!
//! Type names reported by the executor are classified once per column into
//! a closed [`ColumnKind`]; rendering then matches on the kind exhaustively.
//! A type name outside the known set is rejected at classification, so an
//! unknown type can never reach the renderer.

use crate::error::{Result, SnapshotError};
use crate::executor::SqlExecutor;

/// Escaping strategy for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Character, date/time, and other string-literal types; quoted.
    /// `money` is here too: its text form carries a currency symbol.
    Text,
    /// Integer, floating point, and arbitrary-precision types; verbatim.
    Numeric,
    /// `bool`; rendered as `TRUE` / `FALSE`.
    Boolean,
}

const TEXT_TYPES: &[&str] = &[
    "text",
    "varchar",
    "bpchar",
    "char",
    "name",
    "citext",
    "date",
    "time",
    "timetz",
    "timestamp",
    "timestamptz",
    "interval",
    "uuid",
    "json",
    "jsonb",
    "inet",
    "cidr",
    "macaddr",
    "money",
];

const NUMERIC_TYPES: &[&str] = &[
    "int2", "int4", "int8", "float4", "float8", "numeric", "oid",
];

impl ColumnKind {
    /// Classifies a type name, or `None` if it has no escaping rule.
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        let normalized = type_name.trim().to_ascii_lowercase();
        let normalized = normalized.as_str();
        if NUMERIC_TYPES.contains(&normalized) {
            Some(Self::Numeric)
        } else if normalized == "bool" || normalized == "boolean" {
            Some(Self::Boolean)
        } else if TEXT_TYPES.contains(&normalized) {
            Some(Self::Text)
        } else {
            None
        }
    }

    /// Classifies a column of `table`, failing with
    /// [`SnapshotError::UnsupportedType`] for unknown type names.
    pub fn for_column(table: &str, column: &str, type_name: &str) -> Result<Self> {
        Self::from_type_name(type_name).ok_or_else(|| SnapshotError::UnsupportedType {
            table: table.to_string(),
            column: column.to_string(),
            type_name: type_name.to_string(),
        })
    }

    /// Renders a text-encoded value as a SQL literal of this kind.
    pub fn render<E: SqlExecutor + ?Sized>(self, executor: &E, value: Option<&str>) -> String {
        let Some(value) = value else {
            return "NULL".to_string();
        };
        match self {
            Self::Text => executor.escape_literal(value),
            Self::Numeric => {
                if is_non_finite(value) {
                    executor.escape_literal(value)
                } else {
                    value.to_string()
                }
            }
            Self::Boolean => {
                if is_truthy(value) {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
        }
    }
}

/// The server renders booleans as `t`/`f`; accept the long forms too.
fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "t" | "true" | "1" | "y" | "yes" | "on"
    )
}

/// `NaN` and the infinities are only valid as quoted literals.
fn is_non_finite(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "nan" | "infinity" | "-infinity"
    )
}
