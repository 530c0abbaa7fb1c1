//! Named guards: boolean predicates over a record, resolved per record type.
//!
//! A guard is captured by name when a destruction is scheduled and evaluated
//! against the record's *current* state when the job runs. Names are resolved
//! through a table built once during configuration; an unknown name fails
//! closed with [`DomainError::PredicateNotFound`].

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::RecordType;
use crate::record::Record;

/// Stable identifier of a registered predicate, e.g. `published?`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuardName(String);

impl GuardName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GuardName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for GuardName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A zero-argument predicate bound to a record.
pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Evaluates an optional guard against a record.
pub trait GuardEvaluator: Send + Sync {
    /// `None` means "no guard" and is unconditionally true.
    fn evaluate(&self, record: &Record, guard: Option<&GuardName>) -> DomainResult<bool>;
}

/// Immutable per-type predicate table.
///
/// Cheap to clone; built once with [`GuardRegistry::builder`].
#[derive(Clone, Default)]
pub struct GuardRegistry {
    table: Arc<HashMap<RecordType, HashMap<GuardName, Predicate>>>,
}

impl GuardRegistry {
    pub fn builder() -> GuardRegistryBuilder {
        GuardRegistryBuilder::default()
    }

    /// A registry with no predicates; every named guard fails closed.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn resolve(&self, record_type: &RecordType, guard: &GuardName) -> Option<&Predicate> {
        self.table.get(record_type).and_then(|guards| guards.get(guard))
    }

    pub fn contains(&self, record_type: &RecordType, guard: &GuardName) -> bool {
        self.resolve(record_type, guard).is_some()
    }
}

impl GuardEvaluator for GuardRegistry {
    fn evaluate(&self, record: &Record, guard: Option<&GuardName>) -> DomainResult<bool> {
        let Some(guard) = guard else {
            return Ok(true);
        };

        let predicate = self
            .resolve(record.record_type(), guard)
            .ok_or_else(|| DomainError::predicate_not_found(record.record_type(), guard))?;

        let verdict = predicate(record);
        tracing::trace!(record_type = %record.record_type(), %guard, verdict, "guard evaluated");
        Ok(verdict)
    }
}

impl fmt::Debug for GuardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .table
            .iter()
            .flat_map(|(ty, guards)| guards.keys().map(move |g| format!("{ty}#{g}")))
            .collect();
        names.sort();
        f.debug_struct("GuardRegistry").field("guards", &names).finish()
    }
}

/// Collects predicates during configuration.
#[derive(Default)]
pub struct GuardRegistryBuilder {
    table: HashMap<RecordType, HashMap<GuardName, Predicate>>,
}

impl GuardRegistryBuilder {
    /// Register `predicate` as `guard` for `record_type`. Re-registering a
    /// name replaces the earlier predicate.
    pub fn register<F>(
        mut self,
        record_type: impl Into<RecordType>,
        guard: impl Into<GuardName>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.table
            .entry(record_type.into())
            .or_default()
            .insert(guard.into(), Arc::new(predicate));
        self
    }

    pub fn build(self) -> GuardRegistry {
        GuardRegistry {
            table: Arc::new(self.table),
        }
    }
}
