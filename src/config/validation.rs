//! Configuration validation.

use crate::backend::{split_weight, BackendRole};
use crate::config::Config;
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend
/// - At least one worker thread
/// - Read/write entries without a weight suffix
/// - Well-formed read-only weights
/// - No duplicate entries within a role
/// - Valid log level and metrics path
///
/// Address resolution is left to the registry; a syntactically valid config
/// can still name a host that does not resolve.
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing the problem.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    if config.global.worker_threads == 0 {
        errors.push("worker_threads must be >= 1".to_string());
    }

    let mut read_write = HashSet::new();
    for spec in &config.backends.read_write {
        if spec.trim().is_empty() {
            errors.push("read/write backend address cannot be empty".to_string());
            continue;
        }

        if spec.contains('@') {
            errors.push(format!(
                "read/write backend '{}' cannot carry a weight",
                spec
            ));
        }

        if !read_write.insert(spec.trim()) {
            errors.push(format!("duplicate read/write backend: {}", spec));
        }
    }

    let mut read_only = HashSet::new();
    for spec in &config.backends.read_only {
        match split_weight(spec, BackendRole::ReadOnly) {
            Ok((address, _)) if address.trim().is_empty() => {
                errors.push("read-only backend address cannot be empty".to_string());
            }
            Ok((address, _)) => {
                if !read_only.insert(address.trim()) {
                    errors.push(format!("duplicate read-only backend: {}", address));
                }
            }
            Err(e) => errors.push(e.to_string()),
        }
    }

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if !config.global.metrics.path.starts_with('/') {
        errors.push(format!(
            "metrics path '{}' must start with '/'",
            config.global.metrics.path
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
