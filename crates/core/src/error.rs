//! Domain error model.

use thiserror::Error;

use crate::guard::GuardName;
use crate::id::RecordType;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation, configuration).
/// Storage and queue failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. an empty dependent key set).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A guard name was used that has no predicate registered for the type.
    ///
    /// This is a configuration error, never a runtime race.
    #[error("no predicate `{guard}` registered for record type `{record_type}`")]
    PredicateNotFound {
        record_type: RecordType,
        guard: GuardName,
    },

    /// A row lacks a usable key value in the named column.
    #[error("record of type `{record_type}` has no key in column `{column}`")]
    MissingKey {
        record_type: RecordType,
        column: String,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn predicate_not_found(record_type: &RecordType, guard: &GuardName) -> Self {
        Self::PredicateNotFound {
            record_type: record_type.clone(),
            guard: guard.clone(),
        }
    }

    pub fn missing_key(record_type: &RecordType, column: impl Into<String>) -> Self {
        Self::MissingKey {
            record_type: record_type.clone(),
            column: column.into(),
        }
    }
}
