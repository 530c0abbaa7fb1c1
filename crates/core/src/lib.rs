//! `reaper-core`: domain building blocks for deferred record destruction.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! record identifiers and rows, the named-guard abstraction, and the two job
//! payload shapes.

pub mod error;
pub mod guard;
pub mod id;
pub mod payload;
pub mod record;

pub use error::{DomainError, DomainResult};
pub use guard::{GuardEvaluator, GuardName, GuardRegistry, GuardRegistryBuilder, Predicate};
pub use id::{KeyValue, RecordType};
pub use payload::{CascadePayload, DependentKeys, SelfDestroyPayload};
pub use record::Record;
