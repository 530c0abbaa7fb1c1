use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, anyhow};
use tracing::{debug, info};

use chrono::Duration;

use reaper_core::{GuardName, GuardRegistry, Record};

use crate::clock::Clock;
use crate::jobs::{Job, JobId, JobStore, RetryPolicy};
use crate::record_store::{HookContext, LifecycleObserver, RecordStore};

use super::config::{ConfigError, EnqueueMode, TriggerConfig};
use super::schedule::ScheduleRule;

/// Lifecycle observer that turns record writes into destroy jobs.
///
/// - destroy: one cascade job per deferred association with dependents
/// - create: one self-destroy job per eligible rule
/// - update: one self-destroy job per rule whose condition just became true
///
/// Earlier jobs for the same record are never removed; the guard re-check at
/// fire time turns stale ones into no-ops.
pub struct EnqueueTrigger {
    config: TriggerConfig,
    guards: GuardRegistry,
    jobs: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    mode: EnqueueMode,
    retry_policy: RetryPolicy,
    pending: Mutex<Vec<Job>>,
}

impl EnqueueTrigger {
    pub fn new(
        config: TriggerConfig,
        guards: GuardRegistry,
        jobs: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            guards,
            jobs,
            clock,
            mode: EnqueueMode::default(),
            retry_policy: RetryPolicy::default(),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mode(mut self, mode: EnqueueMode) -> Self {
        self.mode = mode;
        self
    }

    /// Retry policy stamped on every job this trigger enqueues.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn mode(&self) -> EnqueueMode {
        self.mode
    }

    /// Jobs held back until the open transaction commits.
    pub fn buffered(&self) -> usize {
        self.pending().map(|p| p.len()).unwrap_or(0)
    }

    fn pending(&self) -> anyhow::Result<MutexGuard<'_, Vec<Job>>> {
        self.pending
            .lock()
            .map_err(|_| anyhow!("enqueue buffer poisoned"))
    }

    /// Schedule `record` for destruction `after` from now, outside any rule.
    ///
    /// With `ensuring`, the job re-checks that guard at fire time and does
    /// nothing if it no longer holds. Inside an open transaction the job is
    /// published on commit, like rule-driven jobs.
    pub fn destroy_later(
        &self,
        store: &dyn RecordStore,
        record: &Record,
        after: Duration,
        ensuring: Option<GuardName>,
    ) -> anyhow::Result<JobId> {
        let record_type = record.record_type();
        if after < Duration::zero() {
            return Err(ConfigError::NegativeDelay(record_type.clone()).into());
        }

        let mut rule = ScheduleRule::new(record_type.clone(), after);
        if let Some(guard) = ensuring {
            if !self.guards.contains(record_type, &guard) {
                return Err(ConfigError::UnknownGuard {
                    record_type: record_type.clone(),
                    guard,
                }
                .into());
            }
            rule = rule.ensuring(guard);
        }

        let ctx = HookContext {
            in_transaction: store.in_transaction(),
        };
        self.schedule(ctx, store, &rule, record)
    }

    fn publish(&self, ctx: HookContext, job: Job) -> anyhow::Result<JobId> {
        let job = job.with_retry_policy(self.retry_policy.clone());
        let id = job.id;
        if ctx.in_transaction && self.mode == EnqueueMode::Transactional {
            debug!(job_id = %id, kind = %job.kind, "job buffered until commit");
            self.pending()?.push(job);
            return Ok(id);
        }

        let kind = job.kind;
        let id = self
            .jobs
            .enqueue(job)
            .with_context(|| format!("failed to enqueue {kind} job"))?;
        debug!(job_id = %id, %kind, "job enqueued");
        Ok(id)
    }

    fn schedule(
        &self,
        ctx: HookContext,
        store: &dyn RecordStore,
        rule: &ScheduleRule,
        record: &Record,
    ) -> anyhow::Result<JobId> {
        let pk = store.primary_key_column(record.record_type())?;
        let payload = rule.payload(record.require_key(&pk)?);
        let now = self.clock.now();
        let fire_at = rule.fire_at(now);

        info!(
            record_type = %record.record_type(),
            key = %payload.record_key(),
            %fire_at,
            guard = rule.ensuring_guard().map(|g| g.as_str()),
            "scheduling self-destroy"
        );
        self.publish(ctx, Job::self_destroy(&payload, fire_at, now)?)
    }
}

impl LifecycleObserver for EnqueueTrigger {
    fn after_create(
        &self,
        ctx: HookContext,
        store: &dyn RecordStore,
        record: &Record,
    ) -> anyhow::Result<()> {
        for rule in self.config.rules(record.record_type()) {
            if rule.fires_on_create(&self.guards, record)? {
                self.schedule(ctx, store, rule, record)?;
            }
        }
        Ok(())
    }

    fn after_update(
        &self,
        ctx: HookContext,
        store: &dyn RecordStore,
        before: &Record,
        after: &Record,
    ) -> anyhow::Result<()> {
        for rule in self.config.rules(after.record_type()) {
            if rule.fires_on_update(&self.guards, before, after)? {
                self.schedule(ctx, store, rule, after)?;
            }
        }
        Ok(())
    }

    fn after_destroy(
        &self,
        ctx: HookContext,
        store: &dyn RecordStore,
        record: &Record,
    ) -> anyhow::Result<()> {
        for association in self.config.associations(record.record_type()) {
            let Some(payload) = association.resolve(store, record)? else {
                debug!(
                    owner_type = %record.record_type(),
                    association = association.name(),
                    "no dependents to cascade"
                );
                continue;
            };

            info!(
                owner_type = %payload.owner_type(),
                owner_key = %payload.owner_key(),
                association = association.name(),
                dependents = payload.dependent_keys().len(),
                "scheduling cascade"
            );
            self.publish(ctx, Job::cascade(&payload, self.clock.now())?)?;
        }
        Ok(())
    }

    fn after_commit(&self) -> anyhow::Result<()> {
        let jobs = std::mem::take(&mut *self.pending()?);
        if jobs.is_empty() {
            return Ok(());
        }

        debug!(jobs = jobs.len(), "publishing jobs on commit");
        for job in jobs {
            let kind = job.kind;
            self.jobs
                .enqueue(job)
                .with_context(|| format!("failed to enqueue {kind} job on commit"))?;
        }
        Ok(())
    }

    fn after_rollback(&self) {
        let discarded = self.pending().map(|mut p| std::mem::take(&mut *p).len()).unwrap_or(0);
        if discarded > 0 {
            info!(discarded, "rollback discarded buffered jobs");
        }
    }
}

impl fmt::Debug for EnqueueTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueTrigger")
            .field("config", &self.config)
            .field("mode", &self.mode)
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}
