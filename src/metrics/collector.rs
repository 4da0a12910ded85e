//! Metrics collector using prometheus-client.
//!
//! Provides metrics for registry membership, administrative operations and
//! replica selections.

use crate::backend::BackendRole;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Labels for backend membership metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RoleLabels {
    pub role: String,
}

/// Labels for selection metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SelectionLabels {
    pub backend: String,
}

/// Labels for registry operation metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: Operation,
    pub result: OperationResult,
}

/// Administrative registry operation.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Operation {
    Add,
    Remove,
}

/// Result of a registry operation.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum OperationResult {
    Success,
    Invalid,
    Duplicate,
    OutOfRange,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Registered backends per role.
    backends: Family<RoleLabels, Gauge>,
    /// Read-only selections per backend.
    selections_total: Family<SelectionLabels, Counter>,
    /// Administrative operations by outcome.
    operations_total: Family<OperationLabels, Counter>,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let backends = Family::<RoleLabels, Gauge>::default();
        let selections_total = Family::<SelectionLabels, Counter>::default();
        let operations_total = Family::<OperationLabels, Counter>::default();

        registry.register(
            "sqlgate_backends",
            "Number of registered backends by role",
            backends.clone(),
        );
        registry.register(
            "sqlgate_backend_selections",
            "Total number of read-only backend selections",
            selections_total.clone(),
        );
        registry.register(
            "sqlgate_registry_operations",
            "Total number of administrative registry operations",
            operations_total.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                backends,
                selections_total,
                operations_total,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Encode every metric in Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, self.registry())?;
        Ok(buffer)
    }

    /// Publish current membership.
    pub fn set_backend_counts(&self, read_write: usize, read_only: usize) {
        for (role, count) in [
            (BackendRole::ReadWrite, read_write),
            (BackendRole::ReadOnly, read_only),
        ] {
            let labels = RoleLabels {
                role: role.as_str().to_string(),
            };
            self.inner
                .backends
                .get_or_create(&labels)
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }
    }

    /// Selection counter for a read-only backend.
    ///
    /// The handle shares its value with the family, so the caller can keep it
    /// and increment without a label lookup.
    pub fn selection_counter(&self, backend: &str) -> Counter {
        let labels = SelectionLabels {
            backend: backend.to_string(),
        };
        self.inner.selections_total.get_or_create(&labels).clone()
    }

    /// Drop a backend's selection series. Returns whether it existed.
    pub fn remove_selection_counter(&self, backend: &str) -> bool {
        let labels = SelectionLabels {
            backend: backend.to_string(),
        };
        self.inner.selections_total.remove(&labels)
    }

    /// Record an administrative operation.
    pub fn record_operation(&self, operation: Operation, result: OperationResult) {
        let labels = OperationLabels { operation, result };
        self.inner.operations_total.get_or_create(&labels).inc();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
