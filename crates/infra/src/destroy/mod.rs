//! Background destroy jobs.
//!
//! - `CascadeDestroyJob`: removes a fixed key set of dependents after
//!   confirming the owner is gone
//! - `ScheduledSelfDestroyJob`: removes one record at its fire time if its
//!   guard still holds
//!
//! Both are idempotent. [`DestroyHandlers`] binds them to a [`JobExecutor`].
//!
//! [`JobExecutor`]: crate::jobs::JobExecutor

pub mod cascade;
pub mod error;
pub mod handlers;
pub mod liveness;
pub mod self_destroy;

pub use cascade::{CascadeDestroyJob, CascadeOutcome};
pub use error::DestroyError;
pub use handlers::{DestroyHandlers, OwnerPresentPolicy};
pub use liveness::OwnerLivenessCheck;
pub use self_destroy::{ScheduledSelfDestroyJob, SelfDestroyOutcome};
