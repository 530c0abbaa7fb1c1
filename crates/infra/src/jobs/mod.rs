//! Background job queue with retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - Two job kinds: `cascade` and `self_destroy`
//! - Delivery is at-least-once; handlers must tolerate re-execution
//! - Jobs may carry an execution time and are not claimed before it
//! - Retry policy with backoff; exhausted or fatal jobs go to the dead-letter queue
//!
//! ## Components
//!
//! - `Job`: envelope (kind, payload, execution time) plus queue bookkeeping
//! - `JobStore`: persistence for jobs (in-memory for tests/dev)
//! - `JobExecutor`: runs jobs with registered handlers and applies retry policy

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{ExecutorStats, JobError, JobExecutor, JobExecutorConfig, JobExecutorHandle};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, Job, JobId, JobKind, JobResult, JobStatus, RetryPolicy,
};
