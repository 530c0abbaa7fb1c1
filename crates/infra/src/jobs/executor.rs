//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::clock::Clock;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, JobKind, JobResult, JobStatus};

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> JobResult + Send + Sync>;

/// Job executor configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JobExecutorConfig {
    /// How often an idle worker polls for ready jobs
    pub poll_interval: Duration,
    /// Number of worker threads
    pub max_concurrent: usize,
    /// Name for logging and thread names
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_concurrent: 4,
            name: "reaper-worker".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Execution failure, as seen by the caller of [`JobExecutor::execute_one`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("no handler for job kind: {0}")]
    NoHandler(JobKind),
    #[error("job {job_id} failed: {error}")]
    Failed { job_id: JobId, error: String },
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Handle to control running workers.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
    started: Instant,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for in-flight jobs to finish.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for worker in self.workers {
            let _ = worker.join();
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

impl ExecutorStats {
    fn record(&mut self, job: &Job, outcome: &Result<(), JobError>) {
        self.jobs_processed += 1;
        match outcome {
            Ok(()) => self.jobs_succeeded += 1,
            Err(_) => {
                self.jobs_failed += 1;
                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                    self.jobs_dead_lettered += 1;
                }
            }
        }
    }
}

/// Background job executor.
///
/// Claims ready jobs from a store, runs them with the handler registered for
/// their kind, and applies the job's retry policy to failures.
pub struct JobExecutor<S: JobStore> {
    store: S,
    clock: Arc<dyn Clock>,
    handlers: HashMap<JobKind, JobHandler>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            handlers: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register the handler for a job kind, replacing any previous one.
    pub fn register_handler<F>(&mut self, kind: JobKind, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
    }

    /// Execute an already-claimed job and persist its new status.
    pub fn execute_one(&self, job: &mut Job) -> Result<(), JobError> {
        let Some(handler) = self.handlers.get(&job.kind) else {
            let err = JobError::NoHandler(job.kind);
            warn!(job_id = %job.id, kind = %job.kind, "no handler for job");
            let now = self.clock.now();
            job.mark_fatal(err.to_string(), now, now);
            self.store.dead_letter(job.clone(), err.to_string(), now)?;
            return Err(err);
        };

        let started = self.clock.now();
        let result = handler(job);
        let now = self.clock.now();

        let error = match result {
            JobResult::Success => {
                job.mark_completed(started, now);
                self.store.update(job)?;
                debug!(job_id = %job.id, kind = %job.kind, "job completed");
                return Ok(());
            }
            JobResult::Failure(error) => {
                job.mark_failed(error.clone(), started, now);
                error
            }
            JobResult::Fatal(error) => {
                job.mark_fatal(error.clone(), started, now);
                error
            }
            JobResult::RetryNow => {
                let error = "retry requested".to_string();
                job.mark_failed(error.clone(), started, now);
                if job.status.is_retriable() {
                    job.scheduled_at = None;
                }
                error
            }
            JobResult::RetryAfter(delay) => {
                let error = "retry after delay".to_string();
                job.mark_failed(error.clone(), started, now);
                if job.status.is_retriable() {
                    job.scheduled_at =
                        Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
                }
                error
            }
        };

        if matches!(job.status, JobStatus::DeadLettered { .. }) {
            warn!(job_id = %job.id, kind = %job.kind, attempts = job.attempt, error = %error, "job dead-lettered");
            self.store.dead_letter(job.clone(), error.clone(), now)?;
        } else {
            debug!(job_id = %job.id, kind = %job.kind, attempt = job.attempt, error = %error, "job failed, will retry");
            self.store.update(job)?;
        }

        Err(JobError::Failed {
            job_id: job.id,
            error,
        })
    }

    /// Claim and run every job that is ready now, including jobs enqueued by
    /// the jobs being run, until nothing is ready.
    pub fn perform_ready(&self) -> Result<ExecutorStats, JobError> {
        let mut stats = ExecutorStats::default();
        while let Some(mut job) = self.store.claim_next(self.clock.now())? {
            let outcome = self.execute_one(&mut job);
            if let Err(JobError::Store(err)) = &outcome {
                return Err(JobError::Store(err.clone()));
            }
            stats.record(&job, &outcome);
        }
        Ok(stats)
    }

    /// Spawn `config.max_concurrent` polling workers.
    pub fn spawn(self, config: JobExecutorConfig) -> Result<JobExecutorHandle, JobError>
    where
        S: Send,
    {
        let executor = Arc::new(self);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));

        let mut workers = Vec::with_capacity(config.max_concurrent.max(1));
        for index in 0..config.max_concurrent.max(1) {
            let executor = executor.clone();
            let shutdown = shutdown.clone();
            let stats = stats.clone();
            let config = config.clone();
            let worker = thread::Builder::new()
                .name(format!("{}-{index}", config.name))
                .spawn(move || worker_loop(&executor, &config, index, &shutdown, &stats))
                .map_err(|e| JobError::Spawn(e.to_string()))?;
            workers.push(worker);
        }

        Ok(JobExecutorHandle {
            shutdown,
            workers,
            stats,
            started: Instant::now(),
        })
    }
}

fn worker_loop<S: JobStore + 'static>(
    executor: &JobExecutor<S>,
    config: &JobExecutorConfig,
    index: usize,
    shutdown: &AtomicBool,
    stats: &Mutex<ExecutorStats>,
) {
    info!(executor = %config.name, worker = index, "job worker started");

    while !shutdown.load(Ordering::SeqCst) {
        match executor.store.claim_next(executor.clock.now()) {
            Ok(Some(mut job)) => {
                debug!(executor = %config.name, job_id = %job.id, kind = %job.kind, "claimed job");
                stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .current_running += 1;

                let outcome = executor.execute_one(&mut job);

                {
                    let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
                    s.current_running = s.current_running.saturating_sub(1);
                    s.record(&job, &outcome);
                }

                if let Err(e) = outcome {
                    debug!(executor = %config.name, job_id = %job.id, error = %e, status = ?job.status, "job execution failed");
                }
            }
            Ok(None) => thread::sleep(config.poll_interval),
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(executor = %config.name, worker = index, "job worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::RetryPolicy;
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (Arc<InMemoryJobStore>, Arc<ManualClock>, JobExecutor<Arc<InMemoryJobStore>>) {
        let store = InMemoryJobStore::arc();
        let clock = Arc::new(ManualClock::frozen());
        let executor = JobExecutor::new(store.clone(), clock.clone());
        (store, clock, executor)
    }

    #[test]
    fn execute_successful_job() {
        let (store, clock, mut executor) = setup();
        executor.register_handler(JobKind::Cascade, |_job| JobResult::Success);

        store
            .enqueue(Job::new(JobKind::Cascade, serde_json::json!({}), clock.now()))
            .unwrap();

        let mut claimed = store.claim_next(clock.now()).unwrap().unwrap();
        executor.execute_one(&mut claimed).unwrap();
        assert!(matches!(claimed.status, JobStatus::Completed));
        assert!(matches!(
            store.get(claimed.id).unwrap().unwrap().status,
            JobStatus::Completed
        ));
    }

    #[test]
    fn failing_job_retries_then_dead_letters() {
        let (store, clock, mut executor) = setup();
        executor.register_handler(JobKind::Cascade, |_job| JobResult::Failure("boom".into()));

        let job = Job::new(JobKind::Cascade, serde_json::json!({}), clock.now()).with_retry_policy(
            RetryPolicy::fixed(2, std::time::Duration::from_secs(30)),
        );
        store.enqueue(job).unwrap();

        let mut claimed = store.claim_next(clock.now()).unwrap().unwrap();
        assert!(executor.execute_one(&mut claimed).is_err());
        assert!(claimed.status.is_retriable());

        // Backoff not yet elapsed.
        assert!(store.claim_next(clock.now()).unwrap().is_none());
        clock.travel(chrono::Duration::seconds(30));

        let mut claimed = store.claim_next(clock.now()).unwrap().unwrap();
        assert!(executor.execute_one(&mut claimed).is_err());
        assert!(matches!(claimed.status, JobStatus::DeadLettered { .. }));
        assert_eq!(store.list_dead_letters(10).unwrap().len(), 1);
    }

    #[test]
    fn fatal_result_dead_letters_immediately() {
        let (store, clock, mut executor) = setup();
        executor.register_handler(JobKind::SelfDestroy, |_job| JobResult::Fatal("misconfigured".into()));

        store
            .enqueue(Job::new(JobKind::SelfDestroy, serde_json::json!({}), clock.now()))
            .unwrap();

        let stats = executor.perform_ready().unwrap();
        assert_eq!(stats.jobs_processed, 1);
        assert_eq!(stats.jobs_dead_lettered, 1);
        assert_eq!(store.list_dead_letters(10).unwrap()[0].reason, "misconfigured");
    }

    #[test]
    fn missing_handler_is_fatal() {
        let (store, clock, executor) = setup();
        store
            .enqueue(Job::new(JobKind::Cascade, serde_json::json!({}), clock.now()))
            .unwrap();

        let mut claimed = store.claim_next(clock.now()).unwrap().unwrap();
        assert!(matches!(
            executor.execute_one(&mut claimed),
            Err(JobError::NoHandler(JobKind::Cascade))
        ));
        assert_eq!(store.stats().unwrap().dead_lettered, 1);
    }

    #[test]
    fn perform_ready_runs_jobs_enqueued_by_jobs() {
        let (store, clock, mut executor) = setup();
        let runs = Arc::new(AtomicUsize::new(0));

        let chained_store = store.clone();
        let chained_clock = clock.clone();
        let counter = runs.clone();
        executor.register_handler(JobKind::Cascade, move |_job| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                let next = Job::new(JobKind::Cascade, serde_json::json!({}), chained_clock.now());
                chained_store.enqueue(next).unwrap();
            }
            JobResult::Success
        });

        store
            .enqueue(Job::new(JobKind::Cascade, serde_json::json!({}), clock.now()))
            .unwrap();

        let stats = executor.perform_ready().unwrap();
        assert_eq!(stats.jobs_succeeded, 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn perform_ready_leaves_future_jobs() {
        let (store, clock, mut executor) = setup();
        executor.register_handler(JobKind::SelfDestroy, |_job| JobResult::Success);

        let later = clock.now() + chrono::Duration::days(1);
        store
            .enqueue(Job::new(JobKind::SelfDestroy, serde_json::json!({}), clock.now()).scheduled_at(later))
            .unwrap();

        assert_eq!(executor.perform_ready().unwrap().jobs_processed, 0);
        clock.travel(chrono::Duration::days(1));
        assert_eq!(executor.perform_ready().unwrap().jobs_processed, 1);
    }

    #[test]
    fn spawned_workers_drain_the_queue() {
        let (store, clock, mut executor) = setup();
        executor.register_handler(JobKind::Cascade, |_job| JobResult::Success);

        for _ in 0..10 {
            store
                .enqueue(Job::new(JobKind::Cascade, serde_json::json!({}), clock.now()))
                .unwrap();
        }

        let handle = executor
            .spawn(
                JobExecutorConfig::default()
                    .with_name("test-worker")
                    .with_max_concurrent(3)
                    .with_poll_interval(Duration::from_millis(5)),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().jobs_succeeded < 10 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let stats = handle.stats();
        handle.shutdown();

        assert_eq!(stats.jobs_succeeded, 10);
        assert_eq!(store.stats().unwrap().completed, 10);
    }
}
