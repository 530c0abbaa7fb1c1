use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use reaper_core::{CascadePayload, GuardEvaluator, SelfDestroyPayload};

use crate::jobs::{Job, JobExecutor, JobKind, JobResult, JobStore};
use crate::record_store::RecordStore;

use super::cascade::CascadeDestroyJob;
use super::error::DestroyError;
use super::self_destroy::ScheduledSelfDestroyJob;

/// What the queue should do with a cascade whose owner is still present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerPresentPolicy {
    /// Fail the attempt and let the job's retry policy decide; it ends in
    /// the dead-letter queue if the owner never goes away.
    #[default]
    Retry,
    /// Dead-letter on the first occurrence.
    DeadLetter,
}

/// Adapts the destroy jobs to queue handlers.
#[derive(Clone)]
pub struct DestroyHandlers {
    store: Arc<dyn RecordStore>,
    guards: Arc<dyn GuardEvaluator>,
    owner_present: OwnerPresentPolicy,
}

impl DestroyHandlers {
    pub fn new(store: Arc<dyn RecordStore>, guards: Arc<dyn GuardEvaluator>) -> Self {
        Self {
            store,
            guards,
            owner_present: OwnerPresentPolicy::default(),
        }
    }

    pub fn with_owner_present_policy(mut self, policy: OwnerPresentPolicy) -> Self {
        self.owner_present = policy;
        self
    }

    /// Register the `cascade` and `self_destroy` handlers.
    pub fn register<S: JobStore + 'static>(self, executor: &mut JobExecutor<S>) {
        let cascade = self.clone();
        executor.register_handler(JobKind::Cascade, move |job| cascade.run_cascade(job));
        executor.register_handler(JobKind::SelfDestroy, move |job| self.run_self_destroy(job));
    }

    pub fn run_cascade(&self, job: &Job) -> JobResult {
        let result = job
            .payload_as::<CascadePayload>()
            .map_err(|source| DestroyError::Payload {
                kind: JobKind::Cascade,
                source,
            })
            .and_then(|payload| CascadeDestroyJob::new(self.store.as_ref()).perform(&payload));

        match result {
            Ok(_) => JobResult::Success,
            Err(err) => self.failure(job, err),
        }
    }

    pub fn run_self_destroy(&self, job: &Job) -> JobResult {
        let result = job
            .payload_as::<SelfDestroyPayload>()
            .map_err(|source| DestroyError::Payload {
                kind: JobKind::SelfDestroy,
                source,
            })
            .and_then(|payload| {
                ScheduledSelfDestroyJob::new(self.store.as_ref(), self.guards.as_ref()).perform(&payload)
            });

        match result {
            Ok(_) => JobResult::Success,
            Err(err) => self.failure(job, err),
        }
    }

    fn failure(&self, job: &Job, err: DestroyError) -> JobResult {
        let message = err.to_string();
        match err {
            DestroyError::OwnerStillPresent { .. } => {
                error!(job_id = %job.id, attempt = job.attempt, error = %message, "cascade found its owner alive");
                match self.owner_present {
                    OwnerPresentPolicy::Retry => JobResult::Failure(message),
                    OwnerPresentPolicy::DeadLetter => JobResult::Fatal(message),
                }
            }
            DestroyError::PredicateNotFound { .. } | DestroyError::Payload { .. } => {
                error!(job_id = %job.id, kind = %job.kind, error = %message, "destroy job misconfigured");
                JobResult::Fatal(message)
            }
            DestroyError::Store(_) => {
                warn!(job_id = %job.id, kind = %job.kind, error = %message, "destroy job hit a store failure");
                JobResult::Failure(message)
            }
        }
    }
}
