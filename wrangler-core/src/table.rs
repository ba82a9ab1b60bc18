//! Column contracts and typed row values shared by every engine component.
//!
//! A [`Row`] is an ordered mapping from column name to [`FieldValue`]. Rows are
//! stored as JSON objects, so the order is restored from the owning table's
//! column list when rows are loaded.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Declared column type
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    /// Coerce a value to this type. Returns `None` when the value cannot be
    /// represented; NULL is always accepted.
    pub fn coerce(&self, value: &FieldValue) -> Option<FieldValue> {
        match (self, value) {
            (_, FieldValue::Null) => Some(FieldValue::Null),

            (ColumnType::Text, FieldValue::Text(s)) => Some(FieldValue::Text(s.clone())),
            (ColumnType::Text, other) => Some(FieldValue::Text(other.to_string())),

            (ColumnType::Integer, FieldValue::Integer(i)) => Some(FieldValue::Integer(*i)),
            (ColumnType::Integer, FieldValue::Real(r)) => integral(*r).map(FieldValue::Integer),
            (ColumnType::Integer, FieldValue::Text(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Some(FieldValue::Null);
                }
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Some(FieldValue::Integer(i));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(integral)
                    .map(FieldValue::Integer)
            }

            (ColumnType::Real, FieldValue::Real(r)) => {
                r.is_finite().then_some(FieldValue::Real(*r))
            }
            (ColumnType::Real, FieldValue::Integer(i)) => Some(FieldValue::Real(*i as f64)),
            (ColumnType::Real, FieldValue::Text(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Some(FieldValue::Null);
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|r| r.is_finite())
                    .map(FieldValue::Real)
            }
        }
    }
}

fn integral(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// A typed field value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Type-tagged canonical text used for duplicate detection. NULL has no
    /// signature and therefore never matches another row.
    pub fn signature(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Integer(i) => Some(format!("i:{}", i)),
            FieldValue::Real(r) => Some(format!("r:{}", r)),
            FieldValue::Text(s) => Some(format!("t:{}", s)),
        }
    }

    /// Convert a stored JSON value back into a field value
    pub fn from_json(value: &serde_json::Value) -> FieldValue {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => n.as_f64().map(FieldValue::Real).unwrap_or(FieldValue::Null),
            },
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Real(r) => write!(f, "{}", r),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Ordered column name to value mapping
pub type Row = IndexMap<String, FieldValue>;

/// Column definition as registered with the schema registry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub is_image: bool,
    #[serde(default)]
    pub is_duplicate_key: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_image: false,
            is_duplicate_key: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub fn duplicate_key(mut self) -> Self {
        self.is_duplicate_key = true;
        self
    }

    pub fn image(mut self) -> Self {
        self.is_image = true;
        self
    }

    /// Storage shape of the column: name and type only
    pub fn physical(&self) -> Self {
        Self::new(self.name.clone(), self.column_type)
    }
}

/// A row as read back from storage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Engine-internal identity
    pub row_uuid: String,
    /// Insertion order within the table
    pub position: i64,
    /// Identity of the source row a derived row was computed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_row_uuid: Option<String>,
    pub values: Row,
}

/// Replace every character that is not ASCII alphanumeric with `_`
pub fn sanitize_identifier(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
