//! Tracing subscriber setup.
//!
//! Libraries embedding the engine usually install their own subscriber;
//! [`init`] is for apps and demos that want the default fmt output.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to the
/// configured filter.
///
/// Returns false if a global subscriber was already installed (repeated
/// calls are harmless).
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
