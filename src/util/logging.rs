//! Logging initialization and configuration.

use crate::config::LogFormat;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the level filter. `RUST_LOG` wins over the configured level.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the logging system.
///
/// Thread names are included because pool slots are bound per worker thread.
///
/// # Arguments
///
/// * `level` - Log level filter (e.g., "info", "debug")
/// * `format` - Log output format (json or pretty)
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: &str, format: &LogFormat) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(build_filter(level));

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_thread_names(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_thread_names(true))
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let filter = build_filter(level);
            assert!(!filter.to_string().is_empty());
        }
    }

    #[test]
    fn test_second_init_fails() {
        // Only one global subscriber per process; whichever call comes second errors.
        let first = init_logging("info", &LogFormat::Pretty);
        let second = init_logging("info", &LogFormat::Json);
        assert!(first.is_err() || second.is_err());
    }
}
