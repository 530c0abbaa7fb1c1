use thiserror::Error;

use reaper_core::{DomainError, GuardName, KeyValue, RecordType};

use crate::jobs::JobKind;
use crate::record_store::StoreError;

/// Failure of a destroy job.
///
/// Not-found conditions are outcomes, not errors: an absent self-destroy
/// target or an absent dependent key is skipped.
#[derive(Debug, Error)]
pub enum DestroyError {
    /// The owner of a cascade is still present. Either the destroy that
    /// scheduled the job was rolled back or the owner key was reused; the
    /// dependents are left untouched.
    #[error("owner record not destroyed: {owner_type} {owner_key} still exists")]
    OwnerStillPresent {
        owner_type: RecordType,
        owner_key: KeyValue,
    },

    #[error("no predicate `{guard}` registered for record type `{record_type}`")]
    PredicateNotFound {
        record_type: RecordType,
        guard: GuardName,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: JobKind,
        #[source]
        source: serde_json::Error,
    },
}

impl From<DomainError> for DestroyError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::PredicateNotFound { record_type, guard } => {
                DestroyError::PredicateNotFound { record_type, guard }
            }
            other => DestroyError::Store(StoreError::Domain(other)),
        }
    }
}
