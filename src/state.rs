//! Shared application state.

use crate::backend::{BackendRegistry, ReconcileReport, RegistryError, SystemResolver};
use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::util::ShutdownSignal;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::warn;

/// Shared state accessible from all tasks and worker threads.
#[derive(Clone)]
pub struct AppState {
    /// Current configuration (can be swapped atomically for hot reload).
    config: Arc<ArcSwap<Config>>,

    /// Backend registry, sized by the startup `worker_threads`.
    registry: Arc<BackendRegistry>,

    /// Metrics collector.
    metrics: MetricsCollector,

    /// Shutdown signal.
    shutdown: ShutdownSignal,
}

impl AppState {
    /// Build state from a validated configuration.
    ///
    /// Fails on the first backend that cannot be registered.
    pub fn new(config: Config) -> Result<Self, RegistryError> {
        let metrics = MetricsCollector::new();
        let resolver = Arc::new(SystemResolver::with_default_port(config.global.default_port));
        let registry = BackendRegistry::with_resolver(config.global.worker_threads, resolver)
            .with_metrics(metrics.clone());

        let report = registry.reconcile(&config.backends);
        if let Some(err) = report.errors.into_iter().next() {
            return Err(err);
        }

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            registry: Arc::new(registry),
            metrics,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> arc_swap::Guard<Arc<Config>> {
        self.config.load()
    }

    /// Apply a reloaded configuration.
    ///
    /// Backends are reconciled in place. The worker count is fixed for the
    /// registry's lifetime, so a changed `worker_threads` only takes effect
    /// after a restart.
    pub fn apply_config(&self, new_config: Config) -> ReconcileReport {
        let thread_count = self.registry.thread_count();
        if new_config.global.worker_threads != thread_count {
            warn!(
                current = thread_count,
                requested = new_config.global.worker_threads,
                "worker_threads change requires a restart, keeping current value"
            );
        }

        let report = self.registry.reconcile(&new_config.backends);
        for err in &report.errors {
            warn!(error = %err, "backend from reloaded config not applied");
        }

        self.config.store(Arc::new(new_config));
        report
    }

    /// Get the backend registry.
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Get the metrics collector.
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Get the shutdown signal.
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Trigger shutdown.
    pub fn trigger_shutdown(&self) {
        self.shutdown.shutdown();
    }
}
