//! Configuration file loading.

use crate::config::{validate_config, Config};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a YAML file.
///
/// Reads the file, then parses and validates it with [`parse_config`].
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(contents)?;
    validate_config(&config).map_err(ConfigError::ValidationError)?;

    debug!(
        read_write = config.backends.read_write.len(),
        read_only = config.backends.read_only.len(),
        worker_threads = config.global.worker_threads,
        "parsed configuration"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
backends:
  read_write:
    - "10.0.0.1:3306"
  read_only:
    - "10.0.0.2:3306@3"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backends.read_write.len(), 1);
        assert_eq!(config.backends.read_only, vec!["10.0.0.2:3306@3"]);
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let yaml = r#"
global:
  worker_threads: 0
backends:
  read_only: ["10.0.0.2:3306"]
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::ReadError(_)));
    }

    #[test]
    fn test_parse_config_defaults() {
        let config = parse_config("backends:\n  read_write: [\"/tmp/mysql.sock\"]\n").unwrap();
        assert_eq!(config.global.log_level, "info");
        assert!(config.backends.read_only.is_empty());
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not: valid: yaml: {{{}}}").unwrap();

        let result = load_config(file.path());
        assert!(result.is_err());
    }
}
