//! Strongly-typed identifiers used across the domain.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::DomainError;

/// Name of a record type (one table in the record store), e.g. `book`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordType(String);

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for RecordType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("record type name must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A column value that can identify rows: primary keys, foreign keys and
/// any other key column a payload refers to.
///
/// Ordered so that key sets iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyValue {
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl KeyValue {
    /// Read a key out of a stored column value.
    ///
    /// Strings always come back as `Text`; `null`, floats, booleans and
    /// composite values are not keys.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_i64().map(KeyValue::Int),
            JsonValue::String(s) => Some(KeyValue::Text(s.clone())),
            _ => None,
        }
    }

    /// The column representation this key is compared against.
    pub fn to_json(&self) -> JsonValue {
        match self {
            KeyValue::Int(i) => JsonValue::from(*i),
            KeyValue::Text(s) => JsonValue::String(s.clone()),
            KeyValue::Uuid(u) => JsonValue::String(u.to_string()),
        }
    }

    /// Whether a stored column value holds this key.
    pub fn matches(&self, value: &JsonValue) -> bool {
        match (self, value) {
            (KeyValue::Int(i), JsonValue::Number(n)) => n.as_i64() == Some(*i),
            (KeyValue::Text(s), JsonValue::String(v)) => s == v,
            (KeyValue::Uuid(u), JsonValue::String(v)) => {
                Uuid::from_str(v).map(|parsed| parsed == *u).unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(i) => write!(f, "{i}"),
            KeyValue::Text(s) => f.write_str(s),
            KeyValue::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::Int(i64::from(value))
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Text(value)
    }
}

impl From<Uuid> for KeyValue {
    fn from(value: Uuid) -> Self {
        KeyValue::Uuid(value)
    }
}
