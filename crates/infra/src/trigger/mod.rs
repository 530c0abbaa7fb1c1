//! Enqueue trigger: lifecycle glue that turns record writes into destroy jobs.
//!
//! Configuration is declared once with [`TriggerConfig::builder`] and handed
//! to an [`EnqueueTrigger`], which is registered on the record store as a
//! lifecycle observer.

pub mod association;
pub mod config;
pub mod enqueue;
pub mod schedule;

pub use association::{AssociationKind, DeferredAssociation};
pub use config::{ConfigError, EnqueueMode, TriggerConfig, TriggerConfigBuilder};
pub use enqueue::EnqueueTrigger;
pub use schedule::ScheduleRule;
