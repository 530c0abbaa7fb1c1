use tracing::{debug, info};

use reaper_core::{GuardEvaluator, SelfDestroyPayload};

use crate::record_store::RecordStore;

use super::error::DestroyError;

/// What a scheduled self-destroy run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfDestroyOutcome {
    Destroyed,
    /// The record was already removed (earlier delivery, cascade, or any
    /// other deletion).
    AlreadyGone,
    /// The guard evaluated false against the record's current state.
    GuardRejected,
}

/// Destroys a single record at its fire time, after consulting its guard.
pub struct ScheduledSelfDestroyJob<'a> {
    store: &'a dyn RecordStore,
    guards: &'a dyn GuardEvaluator,
}

impl<'a> ScheduledSelfDestroyJob<'a> {
    pub fn new(store: &'a dyn RecordStore, guards: &'a dyn GuardEvaluator) -> Self {
        Self { store, guards }
    }

    pub fn perform(&self, payload: &SelfDestroyPayload) -> Result<SelfDestroyOutcome, DestroyError> {
        let record_type = payload.record_type();
        let pk = self.store.primary_key_column(record_type)?;

        let Some(record) = self.store.find_by_key(record_type, &pk, payload.record_key())? else {
            debug!(%record_type, key = %payload.record_key(), "self-destroy target already gone");
            return Ok(SelfDestroyOutcome::AlreadyGone);
        };

        if !self.guards.evaluate(&record, payload.guard_name())? {
            info!(
                %record_type,
                key = %payload.record_key(),
                guard = payload.guard_name().map(|g| g.as_str()),
                "self-destroy skipped: guard no longer holds"
            );
            return Ok(SelfDestroyOutcome::GuardRejected);
        }

        if !self.store.destroy(&record)? {
            return Ok(SelfDestroyOutcome::AlreadyGone);
        }

        info!(%record_type, key = %payload.record_key(), "scheduled self-destroy completed");
        Ok(SelfDestroyOutcome::Destroyed)
    }
}
