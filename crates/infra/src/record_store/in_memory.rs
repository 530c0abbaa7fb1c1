use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use tracing::{debug, trace, warn};

use reaper_core::{KeyValue, Record, RecordType};

use super::r#trait::{HookContext, LifecycleObserver, RecordStore, Schema, StoreError};

type Table = BTreeMap<KeyValue, Record>;

#[derive(Debug)]
enum UndoOp {
    Remove { record_type: RecordType, key: KeyValue },
    Restore(Record),
}

#[derive(Debug, Default)]
struct TxState {
    owner: Option<thread::ThreadId>,
    undo: Vec<UndoOp>,
}

/// In-memory record store.
///
/// Intended for tests/dev. Rows are kept per type, ordered by primary key.
/// One transaction scope is open at a time; writes made inside it by the
/// owning thread are undone if the scope fails. A write made outside a scope
/// runs in one of its own, so a failing observer leaves the row untouched.
pub struct InMemoryRecordStore {
    schema: Schema,
    tables: RwLock<HashMap<RecordType, Table>>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    tx: Mutex<TxState>,
    tx_gate: Mutex<()>,
}

/// Ownership of the open transaction scope.
///
/// Dropping it releases the scope; if the owning closure panicked, the
/// scope's writes are undone first.
struct Scope<'a> {
    store: &'a InMemoryRecordStore,
    _gate: MutexGuard<'a, ()>,
}

impl<'a> Scope<'a> {
    fn open(store: &'a InMemoryRecordStore) -> Self {
        let gate = store.tx_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tx = store.tx_state();
        tx.owner = Some(thread::current().id());
        tx.undo.clear();
        drop(tx);
        Self { store, _gate: gate }
    }

    /// Give up ownership and hand back the undo log.
    fn close(&self) -> Vec<UndoOp> {
        let mut tx = self.store.tx_state();
        tx.owner = None;
        std::mem::take(&mut tx.undo)
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        let undo = self.close();
        if thread::panicking() {
            warn!(writes = undo.len(), "transaction aborted by panic");
            if let Err(err) = self.store.rollback(undo) {
                warn!(error = %err, "rollback after panic failed");
            }
            self.store.notify_rollback();
        }
    }
}

impl InMemoryRecordStore {
    pub fn new(schema: Schema) -> Self {
        Self::builder(schema).build()
    }

    pub fn builder(schema: Schema) -> InMemoryRecordStoreBuilder {
        InMemoryRecordStoreBuilder {
            schema,
            observers: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Run `f` in a transaction scope.
    ///
    /// `Ok` commits once every observer's `after_commit` has succeeded. An
    /// `Err` from `f` or from a commit hook undoes every write made in the
    /// scope and notifies `after_rollback`, as does a panic in `f`. A call
    /// made from inside an open scope joins it.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        if self.in_transaction() {
            return f(self);
        }

        let scope = Scope::open(self);
        let result = f(self).and_then(|value| {
            for observer in &self.observers {
                observer
                    .after_commit()
                    .map_err(|err| E::from(StoreError::Observer(err)))?;
            }
            Ok(value)
        });

        let undo = scope.close();
        match result {
            Ok(value) => {
                debug!(writes = undo.len(), "transaction committed");
                Ok(value)
            }
            Err(err) => {
                debug!(writes = undo.len(), "transaction rolled back");
                self.rollback(undo)?;
                self.notify_rollback();
                Err(err)
            }
        }
    }

    fn tx_state(&self) -> MutexGuard<'_, TxState> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_rollback(&self) {
        for observer in &self.observers {
            observer.after_rollback();
        }
    }

    fn read_tables(&self) -> Result<RwLockReadGuard<'_, HashMap<RecordType, Table>>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("record tables poisoned".into()))
    }

    fn write_tables(&self) -> Result<RwLockWriteGuard<'_, HashMap<RecordType, Table>>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("record tables poisoned".into()))
    }

    fn pk(&self, record_type: &RecordType) -> Result<&str, StoreError> {
        self.schema
            .primary_key(record_type)
            .ok_or_else(|| StoreError::UnknownType(record_type.clone()))
    }

    fn row_key(&self, record: &Record) -> Result<KeyValue, StoreError> {
        let pk = self.pk(record.record_type())?;
        Ok(record.require_key(pk)?)
    }

    fn hook_context(&self) -> HookContext {
        HookContext {
            in_transaction: self.in_transaction(),
        }
    }

    fn record_undo(&self, op: UndoOp) {
        let mut tx = self.tx_state();
        if tx.owner == Some(thread::current().id()) {
            tx.undo.push(op);
        }
    }

    fn rollback(&self, undo: Vec<UndoOp>) -> Result<(), StoreError> {
        let mut tables = self.write_tables()?;
        for op in undo.into_iter().rev() {
            match op {
                UndoOp::Remove { record_type, key } => {
                    if let Some(table) = tables.get_mut(&record_type) {
                        table.remove(&key);
                    }
                }
                UndoOp::Restore(record) => {
                    let key = self.row_key(&record)?;
                    tables
                        .entry(record.record_type().clone())
                        .or_default()
                        .insert(key, record);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("schema", &self.schema)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Primary-key lookups use the representation rows are indexed under.
fn index_key(key: &KeyValue) -> KeyValue {
    KeyValue::from_json(&key.to_json()).unwrap_or_else(|| key.clone())
}

impl RecordStore for InMemoryRecordStore {
    fn primary_key_column(&self, record_type: &RecordType) -> Result<String, StoreError> {
        self.pk(record_type).map(str::to_string)
    }

    fn exists(
        &self,
        record_type: &RecordType,
        key_column: &str,
        key: &KeyValue,
    ) -> Result<bool, StoreError> {
        Ok(self.find_by_key(record_type, key_column, key)?.is_some())
    }

    fn find_by_key(
        &self,
        record_type: &RecordType,
        key_column: &str,
        key: &KeyValue,
    ) -> Result<Option<Record>, StoreError> {
        let pk = self.pk(record_type)?;
        let tables = self.read_tables()?;
        let Some(table) = tables.get(record_type) else {
            return Ok(None);
        };

        if key_column == pk {
            return Ok(table.get(&index_key(key)).cloned());
        }

        Ok(table
            .values()
            .find(|r| r.matches_any(key_column, [key]))
            .cloned())
    }

    fn find_all_by_keys(
        &self,
        record_type: &RecordType,
        key_column: &str,
        keys: &BTreeSet<KeyValue>,
    ) -> Result<Vec<Record>, StoreError> {
        let pk = self.pk(record_type)?;
        let tables = self.read_tables()?;
        let Some(table) = tables.get(record_type) else {
            return Ok(Vec::new());
        };

        if key_column == pk {
            let wanted: BTreeSet<KeyValue> = keys.iter().map(index_key).collect();
            return Ok(wanted.iter().filter_map(|k| table.get(k).cloned()).collect());
        }

        Ok(table
            .values()
            .filter(|r| r.matches_any(key_column, keys))
            .cloned()
            .collect())
    }

    fn in_transaction(&self) -> bool {
        self.tx_state().owner == Some(thread::current().id())
    }

    fn create(&self, record: Record) -> Result<Record, StoreError> {
        if !self.in_transaction() {
            return self.transaction(|store| store.create(record));
        }
        let key = self.row_key(&record)?;
        {
            let mut tables = self.write_tables()?;
            let table = tables.entry(record.record_type().clone()).or_default();
            if table.contains_key(&key) {
                return Err(StoreError::DuplicateKey {
                    record_type: record.record_type().clone(),
                    key,
                });
            }
            table.insert(key.clone(), record.clone());
        }
        trace!(record_type = %record.record_type(), %key, "row created");

        self.record_undo(UndoOp::Remove {
            record_type: record.record_type().clone(),
            key,
        });

        let ctx = self.hook_context();
        for observer in &self.observers {
            observer
                .after_create(ctx, self, &record)
                .map_err(StoreError::Observer)?;
        }
        Ok(record)
    }

    fn update(&self, record: Record) -> Result<Record, StoreError> {
        if !self.in_transaction() {
            return self.transaction(|store| store.update(record));
        }
        let key = self.row_key(&record)?;
        let not_found = || StoreError::NotFound {
            record_type: record.record_type().clone(),
            key: key.clone(),
        };

        let before = {
            let mut tables = self.write_tables()?;
            let slot = tables
                .get_mut(record.record_type())
                .and_then(|table| table.get_mut(&key))
                .ok_or_else(not_found)?;
            std::mem::replace(slot, record.clone())
        };
        trace!(record_type = %record.record_type(), %key, "row updated");

        self.record_undo(UndoOp::Restore(before.clone()));

        let ctx = self.hook_context();
        for observer in &self.observers {
            observer
                .after_update(ctx, self, &before, &record)
                .map_err(StoreError::Observer)?;
        }
        Ok(record)
    }

    fn destroy(&self, record: &Record) -> Result<bool, StoreError> {
        if !self.in_transaction() {
            return self.transaction(|store| store.destroy(record));
        }
        let key = self.row_key(record)?;
        let removed = {
            let mut tables = self.write_tables()?;
            tables
                .get_mut(record.record_type())
                .and_then(|table| table.remove(&key))
        };

        let Some(removed) = removed else {
            trace!(record_type = %record.record_type(), %key, "row already absent");
            return Ok(false);
        };
        trace!(record_type = %record.record_type(), %key, "row destroyed");

        self.record_undo(UndoOp::Restore(removed.clone()));

        let ctx = self.hook_context();
        for observer in &self.observers {
            observer
                .after_destroy(ctx, self, &removed)
                .map_err(StoreError::Observer)?;
        }
        Ok(true)
    }

    fn count(&self, record_type: &RecordType) -> Result<usize, StoreError> {
        self.pk(record_type)?;
        let tables = self.read_tables()?;
        Ok(tables.get(record_type).map_or(0, BTreeMap::len))
    }
}

/// Configures observers before the store is shared.
pub struct InMemoryRecordStoreBuilder {
    schema: Schema,
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl InMemoryRecordStoreBuilder {
    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> InMemoryRecordStore {
        InMemoryRecordStore {
            schema: self.schema,
            tables: RwLock::new(HashMap::new()),
            observers: self.observers,
            tx: Mutex::new(TxState::default()),
            tx_gate: Mutex::new(()),
        }
    }

    pub fn build_arc(self) -> Arc<InMemoryRecordStore> {
        Arc::new(self.build())
    }
}
