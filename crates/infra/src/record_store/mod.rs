//! Record store boundary.
//!
//! Defines the row-storage contract the destroy jobs consume (existence checks,
//! key lookups, per-row destroy with lifecycle callbacks) and an in-memory
//! implementation with transaction scopes.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::{InMemoryRecordStore, InMemoryRecordStoreBuilder};
pub use r#trait::{HookContext, LifecycleObserver, RecordStore, Schema, StoreError};
