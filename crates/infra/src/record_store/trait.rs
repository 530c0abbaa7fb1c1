use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;

use reaper_core::{DomainError, KeyValue, Record, RecordType};

/// Per-type table layout: which column is the primary key.
///
/// Types default to `id`; owners with a custom key (e.g. `parent_id`) say so
/// explicitly.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    primary_keys: HashMap<RecordType, String>,
}

impl Schema {
    pub const DEFAULT_PRIMARY_KEY: &'static str = "id";

    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table keyed by `id`.
    pub fn table(self, record_type: impl Into<RecordType>) -> Self {
        self.table_with_key(record_type, Self::DEFAULT_PRIMARY_KEY)
    }

    /// Declare a table with a custom primary-key column.
    pub fn table_with_key(
        mut self,
        record_type: impl Into<RecordType>,
        primary_key: impl Into<String>,
    ) -> Self {
        self.primary_keys.insert(record_type.into(), primary_key.into());
        self
    }

    pub fn primary_key(&self, record_type: &RecordType) -> Option<&str> {
        self.primary_keys.get(record_type).map(String::as_str)
    }

    pub fn contains(&self, record_type: &RecordType) -> bool {
        self.primary_keys.contains_key(record_type)
    }

    pub fn record_types(&self) -> impl Iterator<Item = &RecordType> {
        self.primary_keys.keys()
    }
}

/// Record store operation error.
///
/// "Not found" on reads is not an error: lookups return `Option`/empty
/// results and destroying an absent row returns `false`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown record type: {0}")]
    UnknownType(RecordType),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("duplicate key {key} for record type {record_type}")]
    DuplicateKey { record_type: RecordType, key: KeyValue },

    #[error("no {record_type} row with key {key}")]
    NotFound { record_type: RecordType, key: KeyValue },

    #[error("lifecycle observer failed: {0:#}")]
    Observer(anyhow::Error),

    #[error("storage error: {0}")]
    Backend(String),
}

/// Row storage with per-row lifecycle callbacks.
///
/// `destroy` is the *normal per-row destroy path*: it removes a single row and
/// runs that row's lifecycle observers, so deferred associations owned by the
/// row are triggered in turn. It is idempotent: an absent row yields `false`
/// and triggers nothing.
///
/// A write and its observers succeed or fail together: when an observer
/// fails, the write is undone before the error is returned.
pub trait RecordStore: Send + Sync {
    /// Primary-key column of `record_type`.
    fn primary_key_column(&self, record_type: &RecordType) -> Result<String, StoreError>;

    fn exists(
        &self,
        record_type: &RecordType,
        key_column: &str,
        key: &KeyValue,
    ) -> Result<bool, StoreError>;

    fn find_by_key(
        &self,
        record_type: &RecordType,
        key_column: &str,
        key: &KeyValue,
    ) -> Result<Option<Record>, StoreError>;

    /// Every row whose `key_column` holds one of `keys`, ordered by primary key.
    fn find_all_by_keys(
        &self,
        record_type: &RecordType,
        key_column: &str,
        keys: &BTreeSet<KeyValue>,
    ) -> Result<Vec<Record>, StoreError>;

    fn create(&self, record: Record) -> Result<Record, StoreError>;

    /// Replace an existing row (matched by primary key).
    fn update(&self, record: Record) -> Result<Record, StoreError>;

    /// Delete one row and run its destroy callbacks. Returns whether a row was removed.
    fn destroy(&self, record: &Record) -> Result<bool, StoreError>;

    fn count(&self, record_type: &RecordType) -> Result<usize, StoreError>;

    /// Whether the calling thread has a transaction scope open on this store.
    fn in_transaction(&self) -> bool {
        false
    }
}

impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    fn primary_key_column(&self, record_type: &RecordType) -> Result<String, StoreError> {
        (**self).primary_key_column(record_type)
    }

    fn exists(
        &self,
        record_type: &RecordType,
        key_column: &str,
        key: &KeyValue,
    ) -> Result<bool, StoreError> {
        (**self).exists(record_type, key_column, key)
    }

    fn find_by_key(
        &self,
        record_type: &RecordType,
        key_column: &str,
        key: &KeyValue,
    ) -> Result<Option<Record>, StoreError> {
        (**self).find_by_key(record_type, key_column, key)
    }

    fn find_all_by_keys(
        &self,
        record_type: &RecordType,
        key_column: &str,
        keys: &BTreeSet<KeyValue>,
    ) -> Result<Vec<Record>, StoreError> {
        (**self).find_all_by_keys(record_type, key_column, keys)
    }

    fn create(&self, record: Record) -> Result<Record, StoreError> {
        (**self).create(record)
    }

    fn update(&self, record: Record) -> Result<Record, StoreError> {
        (**self).update(record)
    }

    fn destroy(&self, record: &Record) -> Result<bool, StoreError> {
        (**self).destroy(record)
    }

    fn count(&self, record_type: &RecordType) -> Result<usize, StoreError> {
        (**self).count(record_type)
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }
}

/// Where a lifecycle callback is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookContext {
    /// A transaction scope is open; its writes may still be rolled back.
    pub in_transaction: bool,
}

/// Callbacks run by the store around row writes.
///
/// Observers receive the store itself so they can query it; the store never
/// holds a lock while an observer runs.
pub trait LifecycleObserver: Send + Sync {
    fn after_create(
        &self,
        _ctx: HookContext,
        _store: &dyn RecordStore,
        _record: &Record,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_update(
        &self,
        _ctx: HookContext,
        _store: &dyn RecordStore,
        _before: &Record,
        _after: &Record,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_destroy(
        &self,
        _ctx: HookContext,
        _store: &dyn RecordStore,
        _record: &Record,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// The enclosing transaction committed.
    fn after_commit(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// The enclosing transaction rolled back; its writes have been undone.
    fn after_rollback(&self) {}
}
