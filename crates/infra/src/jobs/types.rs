//! Job envelope, status and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reaper_core::{CascadePayload, SelfDestroyPayload};

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two deferred-destruction job shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Delete the dependents of a destroyed owner.
    Cascade,
    /// Destroy one record at a scheduled time, optionally guarded.
    SelfDestroy,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Cascade => "cascade",
            JobKind::SelfDestroy => "self_destroy",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Currently being executed
    Running,
    /// Completed successfully
    Completed,
    /// Failed, will be retried
    Failed { error: String, attempt: u32 },
    /// Exhausted retries (or failed fatally), moved to DLQ
    DeadLettered { error: String, attempts: u32 },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::DeadLettered { .. })
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, JobStatus::Failed { .. })
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
}

/// Queue-level retry policy. The destroy jobs never retry internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before dead-lettering (1 = never retry)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Fraction (0.0-1.0) of the delay spread around the nominal value
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(600),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Run once; any failure dead-letters the job.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let nominal = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        }
        .min(self.max_delay);

        if self.jitter <= 0.0 {
            return nominal;
        }

        // Deterministic spread so that tests stay reproducible.
        let spread = ((attempt.wrapping_mul(17) % 100) as f64 / 100.0 - 0.5) * 2.0;
        let factor = (1.0 + self.jitter.clamp(0.0, 1.0) * spread).max(0.0);
        nominal.mul_f64(factor)
    }

    /// Whether another attempt is allowed after `attempt` attempts have run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A queued job: the envelope (`kind`, `payload`, `scheduled_at`) plus the
/// queue's own bookkeeping.
///
/// The envelope is fixed at construction; only the bookkeeping fields change
/// as the queue runs the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    /// Earliest execution time; `None` means as soon as possible.
    /// Retries move this forward.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Attempts started so far
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            kind,
            payload,
            scheduled_at: None,
            status: JobStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    /// An as-soon-as-possible cascade job.
    pub fn cascade(payload: &CascadePayload, now: DateTime<Utc>) -> serde_json::Result<Self> {
        Ok(Self::new(JobKind::Cascade, serde_json::to_value(payload)?, now))
    }

    /// A self-destroy job that becomes ready at `fire_at`.
    pub fn self_destroy(
        payload: &SelfDestroyPayload,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(JobKind::SelfDestroy, serde_json::to_value(payload)?, now).scheduled_at(fire_at))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Decode the payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.updated_at = now;
        self.push_history(started_at, now, None);
    }

    /// Record a failed attempt; schedule a retry or dead-letter per policy.
    pub fn mark_failed(&mut self, error: String, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.updated_at = now;
        self.push_history(started_at, now, Some(error.clone()));

        if self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.scheduled_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.status = JobStatus::Failed {
                error,
                attempt: self.attempt,
            };
        } else {
            self.mark_dead(error);
        }
    }

    /// Record a failure that must not be retried.
    pub fn mark_fatal(&mut self, error: String, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.updated_at = now;
        self.push_history(started_at, now, Some(error.clone()));
        self.mark_dead(error);
    }

    fn mark_dead(&mut self, error: String) {
        self.status = JobStatus::DeadLettered {
            error,
            attempts: self.attempt,
        };
    }

    fn push_history(&mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>, error: Option<String>) {
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at,
            success: error.is_none(),
            error,
        });
    }
}

/// Result of job execution, as reported by a handler.
#[derive(Debug)]
pub enum JobResult {
    Success,
    /// Failed; retried per the job's policy
    Failure(String),
    /// Failed in a way retrying cannot fix; dead-lettered at once
    Fatal(String),
    /// Transient failure, retry without backoff
    RetryNow,
    RetryAfter(Duration),
}

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: String, at: DateTime<Utc>) -> Self {
        Self {
            job,
            dead_lettered_at: at,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::{DependentKeys, GuardName, KeyValue, RecordType};

    fn no_jitter(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy,
            jitter: 0.0,
        }
    }

    #[test]
    fn exponential_backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(500),
            ..no_jitter(BackoffStrategy::Exponential)
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_millis(500));
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = no_jitter(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));

        let fixed = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..no_jitter(BackoffStrategy::Fixed)
        };
        for attempt in 1..20 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn typed_constructors_build_envelopes() {
        let now = Utc::now();
        let cascade = CascadePayload::new(
            RecordType::new("book"),
            KeyValue::Int(1),
            RecordType::new("tag"),
            "id",
            DependentKeys::new([KeyValue::Int(2)]).unwrap(),
        );
        let job = Job::cascade(&cascade, now).unwrap();
        assert_eq!(job.kind, JobKind::Cascade);
        assert!(job.is_ready(now));
        assert_eq!(job.payload_as::<CascadePayload>().unwrap(), cascade);

        let fire_at = now + chrono::Duration::days(30);
        let destroy = SelfDestroyPayload::new(
            RecordType::new("book"),
            KeyValue::Int(1),
            Some(GuardName::from("published?")),
        );
        let job = Job::self_destroy(&destroy, fire_at, now).unwrap();
        assert_eq!(job.kind, JobKind::SelfDestroy);
        assert!(!job.is_ready(now));
        assert!(job.is_ready(fire_at));
    }

    #[test]
    fn failure_then_dead_letter() {
        let now = Utc::now();
        let mut job = Job::new(JobKind::Cascade, serde_json::json!({}), now).with_retry_policy(RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        });

        job.mark_running(now);
        job.mark_failed("error 1".into(), now, now);
        assert!(job.status.is_retriable());
        assert!(job.scheduled_at.unwrap() > now);

        job.mark_running(now);
        job.mark_failed("error 2".into(), now, now);
        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 2, .. }));
        assert_eq!(job.history.len(), 2);
        assert!(job.history.iter().all(|h| !h.success));
    }

    #[test]
    fn fatal_failure_skips_retries() {
        let now = Utc::now();
        let mut job = Job::new(JobKind::SelfDestroy, serde_json::json!({}), now);
        job.mark_running(now);
        job.mark_fatal("predicate missing".into(), now, now);
        assert!(job.status.is_terminal());
        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 1, .. }));
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(serde_json::to_value(JobKind::Cascade).unwrap(), "cascade");
        assert_eq!(serde_json::to_value(JobKind::SelfDestroy).unwrap(), "self_destroy");
    }
}
