//! Structured logging configuration.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global tracing subscriber honoring `RUST_LOG`, falling back to
/// `default_level` when unset. Safe to call more than once.
pub fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
