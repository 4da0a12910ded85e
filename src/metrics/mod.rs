//! Metrics collection and exposition.

mod collector;
mod server;

pub use collector::{MetricsCollector, Operation, OperationResult};
pub use server::MetricsServer;
