//! Payloads carried by the two deferred-destruction job kinds.
//!
//! Payloads are immutable once constructed. They describe *what* to destroy;
//! whether it is still right to destroy it is re-derived when the job runs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::guard::GuardName;
use crate::id::{KeyValue, RecordType};

/// A non-empty set of dependent key values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<KeyValue>", into = "Vec<KeyValue>")]
pub struct DependentKeys(BTreeSet<KeyValue>);

impl DependentKeys {
    /// Collect keys, rejecting an empty set. Duplicates collapse.
    pub fn new(keys: impl IntoIterator<Item = KeyValue>) -> DomainResult<Self> {
        let set: BTreeSet<KeyValue> = keys.into_iter().collect();
        if set.is_empty() {
            return Err(DomainError::validation("dependent key set must not be empty"));
        }
        Ok(Self(set))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`: an empty set cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: &KeyValue) -> bool {
        self.0.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    pub fn as_set(&self) -> &BTreeSet<KeyValue> {
        &self.0
    }
}

impl TryFrom<Vec<KeyValue>> for DependentKeys {
    type Error = DomainError;

    fn try_from(value: Vec<KeyValue>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DependentKeys> for Vec<KeyValue> {
    fn from(value: DependentKeys) -> Self {
        value.0.into_iter().collect()
    }
}

/// Deletes the dependents of an owner that has been destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadePayload {
    owner_type: RecordType,
    owner_key: KeyValue,
    dependent_type: RecordType,
    dependent_key_column: String,
    dependent_keys: DependentKeys,
}

impl CascadePayload {
    pub fn new(
        owner_type: RecordType,
        owner_key: KeyValue,
        dependent_type: RecordType,
        dependent_key_column: impl Into<String>,
        dependent_keys: DependentKeys,
    ) -> Self {
        Self {
            owner_type,
            owner_key,
            dependent_type,
            dependent_key_column: dependent_key_column.into(),
            dependent_keys,
        }
    }

    pub fn owner_type(&self) -> &RecordType {
        &self.owner_type
    }

    pub fn owner_key(&self) -> &KeyValue {
        &self.owner_key
    }

    pub fn dependent_type(&self) -> &RecordType {
        &self.dependent_type
    }

    pub fn dependent_key_column(&self) -> &str {
        &self.dependent_key_column
    }

    pub fn dependent_keys(&self) -> &DependentKeys {
        &self.dependent_keys
    }
}

/// Destroys one record at a future time, optionally guarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfDestroyPayload {
    record_type: RecordType,
    record_key: KeyValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    guard_name: Option<GuardName>,
}

impl SelfDestroyPayload {
    pub fn new(record_type: RecordType, record_key: KeyValue, guard_name: Option<GuardName>) -> Self {
        Self {
            record_type,
            record_key,
            guard_name,
        }
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    pub fn record_key(&self) -> &KeyValue {
        &self.record_key
    }

    pub fn guard_name(&self) -> Option<&GuardName> {
        self.guard_name.as_ref()
    }
}
