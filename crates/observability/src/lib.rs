//! Tracing and logging setup shared by the reaper crates.

/// Initialize process-wide tracing with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize process-wide tracing with explicit settings.
///
/// Returns whether this call installed the subscriber.
pub fn init_with(config: &LogConfig) -> bool {
    tracing::init_with(config)
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogConfig, LogFormat, UnknownLogFormat};
