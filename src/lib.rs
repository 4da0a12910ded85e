//! sqlgate - backend registry and replica balancing for a database proxy
//!
//! This crate provides the core a transparent database proxy routes through:
//! - A registry of read/write primaries and read-only replicas
//! - Per-worker-thread connection pools for every backend
//! - Smooth weighted round-robin across replicas
//! - Hot reload of the backend list from YAML configuration
//! - Prometheus metrics

pub mod backend;
pub mod config;
pub mod metrics;
pub mod state;
pub mod util;

pub use backend::{Backend, BackendRegistry, BackendRole, RegistryError};
pub use config::Config;
pub use state::AppState;
