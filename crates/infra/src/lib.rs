//! Infrastructure layer: record store, job queue, destroy jobs, triggers, config.

pub mod clock;
pub mod config;
pub mod destroy;
pub mod jobs;
pub mod record_store;
pub mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EnvConfigError, ReaperConfig};
