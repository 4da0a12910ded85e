//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Downstream database servers
    #[serde(default)]
    pub backends: BackendsConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Number of worker threads, one connection pool slot each
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Port assumed for backend addresses without one
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Poll interval for the config file watcher
    #[serde(default = "default_watch_interval", with = "humantime_serde")]
    pub watch_interval: Duration,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            worker_threads: default_worker_threads(),
            default_port: default_port(),
            watch_interval: default_watch_interval(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics endpoint is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Backend server lists.
///
/// Entries are address specs: `host:port`, `[v6]:port`, a bare host or an
/// absolute Unix socket path. Read-only entries may end in `@weight`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendsConfig {
    /// Primaries
    #[serde(default)]
    pub read_write: Vec<String>,

    /// Replicas
    #[serde(default)]
    pub read_only: Vec<String>,
}

impl BackendsConfig {
    /// Total number of configured entries.
    pub fn len(&self) -> usize {
        self.read_write.len() + self.read_only.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_port() -> u16 {
    crate::backend::DEFAULT_PORT
}

fn default_watch_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.default_port, 3306);
        assert!(config.global.worker_threads >= 1);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn test_backends_serde() {
        let yaml = r#"
read_write: ["10.0.0.1:3306"]
read_only:
  - "10.0.0.2:3306@5"
  - "10.0.0.3:3306"
"#;
        let backends: BackendsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(backends.read_write, vec!["10.0.0.1:3306"]);
        assert_eq!(backends.read_only.len(), 2);
        assert_eq!(backends.len(), 3);
    }

    #[test]
    fn test_global_serde() {
        let yaml = r#"
log_format: pretty
worker_threads: 8
watch_interval: 500ms
metrics:
  enabled: false
"#;
        let global: GlobalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(global.log_format, LogFormat::Pretty);
        assert_eq!(global.worker_threads, 8);
        assert_eq!(global.watch_interval, Duration::from_millis(500));
        assert!(!global.metrics.enabled);
        assert_eq!(global.metrics.path, "/metrics");
    }
}
