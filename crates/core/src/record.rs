//! Row model shared by the record store, guards and jobs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{KeyValue, RecordType};

/// One row of a record type: column name → JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    record_type: RecordType,
    attributes: BTreeMap<String, JsonValue>,
}

impl Record {
    pub fn new(record_type: impl Into<RecordType>) -> Self {
        Self {
            record_type: record_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute assignment.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    pub fn attributes(&self) -> &BTreeMap<String, JsonValue> {
        &self.attributes
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.attributes.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<JsonValue>) {
        self.attributes.insert(column.into(), value.into());
    }

    pub fn str_attr(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(JsonValue::as_str)
    }

    /// Key value held in `column`, if the column holds a usable key.
    pub fn key(&self, column: &str) -> Option<KeyValue> {
        self.get(column).and_then(KeyValue::from_json)
    }

    /// Like [`Record::key`], but a missing key is an error.
    pub fn require_key(&self, column: &str) -> DomainResult<KeyValue> {
        self.key(column)
            .ok_or_else(|| DomainError::missing_key(&self.record_type, column))
    }

    /// Whether `column` holds one of the given keys.
    pub fn matches_any<'a>(&self, column: &str, keys: impl IntoIterator<Item = &'a KeyValue>) -> bool {
        match self.get(column) {
            Some(value) => keys.into_iter().any(|k| k.matches(value)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_reads_typed_columns() {
        let book = Record::new("book").with("id", 7).with("isbn", "978-0").with("price", 9.5);

        assert_eq!(book.key("id"), Some(KeyValue::Int(7)));
        assert_eq!(book.key("isbn"), Some(KeyValue::Text("978-0".into())));
        assert_eq!(book.key("price"), None);
        assert!(matches!(
            book.require_key("missing"),
            Err(DomainError::MissingKey { .. })
        ));
    }

    #[test]
    fn matches_any_checks_membership() {
        let tag = Record::new("tag").with("id", 3);
        let keys = [KeyValue::Int(1), KeyValue::Int(3)];
        assert!(tag.matches_any("id", &keys));
        assert!(!tag.matches_any("id", &[KeyValue::Int(2)]));
        assert!(!tag.matches_any("other", &keys));
    }
}
