//! Process configuration read from `REAPER_*` environment variables.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use reaper_core::{GuardEvaluator, GuardRegistry};
use reaper_observability::{LogConfig, LogFormat};

use crate::clock::Clock;
use crate::destroy::{DestroyHandlers, OwnerPresentPolicy};
use crate::jobs::{BackoffStrategy, JobExecutorConfig, JobStore, RetryPolicy};
use crate::record_store::RecordStore;
use crate::trigger::{EnqueueMode, EnqueueTrigger, TriggerConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value `{value}` for {var}: {reason}")]
pub struct EnvConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Everything a worker process needs besides its record types and guards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaperConfig {
    pub executor: JobExecutorConfig,
    pub retry: RetryPolicy,
    pub owner_present: OwnerPresentPolicy,
    pub enqueue_mode: EnqueueMode,
    pub log: LogConfig,
}

impl ReaperConfig {
    /// Load from the process environment; unset variables keep their defaults.
    ///
    /// | variable | default |
    /// |---|---|
    /// | `REAPER_POLL_INTERVAL_MS` | 100 |
    /// | `REAPER_MAX_CONCURRENT` | 4 |
    /// | `REAPER_WORKER_NAME` | `reaper-worker` |
    /// | `REAPER_RETRY_MAX_ATTEMPTS` | 5 |
    /// | `REAPER_RETRY_BASE_DELAY_MS` | 3000 |
    /// | `REAPER_RETRY_MAX_DELAY_MS` | 600000 |
    /// | `REAPER_RETRY_STRATEGY` | `exponential` |
    /// | `REAPER_OWNER_PRESENT` | `retry` |
    /// | `REAPER_ENQUEUE_MODE` | `transactional` |
    /// | `REAPER_LOG_FORMAT` | `json` |
    /// | `REAPER_LOG_FILTER` | unset (`RUST_LOG`, then `info`) |
    pub fn from_env() -> Result<Self, EnvConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EnvConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Env { lookup: &lookup };

        if let Some(delay) = env.parse("REAPER_POLL_INTERVAL_MS", millis)? {
            config.executor.poll_interval = delay;
        }
        if let Some(n) = env.parse("REAPER_MAX_CONCURRENT", positive)? {
            config.executor.max_concurrent = n as usize;
        }
        if let Some(name) = env.get("REAPER_WORKER_NAME") {
            config.executor.name = name;
        }

        if let Some(n) = env.parse("REAPER_RETRY_MAX_ATTEMPTS", positive)? {
            config.retry.max_attempts = n;
        }
        if let Some(delay) = env.parse("REAPER_RETRY_BASE_DELAY_MS", millis)? {
            config.retry.base_delay = delay;
        }
        if let Some(delay) = env.parse("REAPER_RETRY_MAX_DELAY_MS", millis)? {
            config.retry.max_delay = delay;
        }
        if let Some(strategy) = env.parse("REAPER_RETRY_STRATEGY", backoff_strategy)? {
            config.retry.strategy = strategy;
        }
        if config.retry.max_delay < config.retry.base_delay {
            return Err(EnvConfigError {
                var: "REAPER_RETRY_MAX_DELAY_MS",
                value: config.retry.max_delay.as_millis().to_string(),
                reason: "must not be below the base delay".into(),
            });
        }

        if let Some(policy) = env.parse("REAPER_OWNER_PRESENT", owner_present_policy)? {
            config.owner_present = policy;
        }
        if let Some(mode) = env.parse("REAPER_ENQUEUE_MODE", enqueue_mode)? {
            config.enqueue_mode = mode;
        }
        if let Some(format) = env.parse("REAPER_LOG_FORMAT", |v| {
            LogFormat::from_str(v).map_err(|e| e.to_string())
        })? {
            config.log.format = format;
        }
        if let Some(filter) = env.get("REAPER_LOG_FILTER") {
            config.log.filter = Some(filter);
        }

        Ok(config)
    }

    /// Install the process-wide subscriber described by `log`.
    ///
    /// Returns `false` if one was already installed.
    pub fn init_logging(&self) -> bool {
        reaper_observability::init_with(&self.log)
    }

    /// Queue handlers honouring the configured owner-present policy.
    pub fn destroy_handlers(
        &self,
        store: Arc<dyn RecordStore>,
        guards: Arc<dyn GuardEvaluator>,
    ) -> DestroyHandlers {
        DestroyHandlers::new(store, guards).with_owner_present_policy(self.owner_present)
    }

    /// Enqueue trigger using the configured mode and retry policy.
    pub fn enqueue_trigger(
        &self,
        triggers: TriggerConfig,
        guards: GuardRegistry,
        jobs: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> EnqueueTrigger {
        EnqueueTrigger::new(triggers, guards, jobs, clock)
            .with_mode(self.enqueue_mode)
            .with_retry_policy(self.retry.clone())
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(
        &self,
        var: &'static str,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<Option<T>, EnvConfigError> {
        let Some(value) = self.get(var) else {
            return Ok(None);
        };
        parse(&value)
            .map(Some)
            .map_err(|reason| EnvConfigError { var, value, reason })
    }
}

fn millis(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| e.to_string())
}

fn positive(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(0) => Err("must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn backoff_strategy(value: &str) -> Result<BackoffStrategy, String> {
    match value.to_ascii_lowercase().as_str() {
        "fixed" => Ok(BackoffStrategy::Fixed),
        "linear" => Ok(BackoffStrategy::Linear),
        "exponential" => Ok(BackoffStrategy::Exponential),
        _ => Err("expected fixed, linear or exponential".into()),
    }
}

fn owner_present_policy(value: &str) -> Result<OwnerPresentPolicy, String> {
    match value.to_ascii_lowercase().as_str() {
        "retry" => Ok(OwnerPresentPolicy::Retry),
        "dead_letter" | "dead-letter" => Ok(OwnerPresentPolicy::DeadLetter),
        _ => Err("expected retry or dead_letter".into()),
    }
}

fn enqueue_mode(value: &str) -> Result<EnqueueMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "transactional" => Ok(EnqueueMode::Transactional),
        "immediate" => Ok(EnqueueMode::Immediate),
        _ => Err("expected transactional or immediate".into()),
    }
}
