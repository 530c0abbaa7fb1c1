use reaper_core::{KeyValue, RecordType};

use crate::record_store::{RecordStore, StoreError};

/// Answers whether an owner row currently exists.
///
/// A plain primary-key read: no caching, no side effects.
#[derive(Clone, Copy)]
pub struct OwnerLivenessCheck<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> OwnerLivenessCheck<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    pub fn exists(&self, owner_type: &RecordType, owner_key: &KeyValue) -> Result<bool, StoreError> {
        let pk = self.store.primary_key_column(owner_type)?;
        self.store.exists(owner_type, &pk, owner_key)
    }
}
