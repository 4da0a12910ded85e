//! Registry of downstream backends shared by all worker threads.
//!
//! Membership changes are rare (administrative add/remove, config reload)
//! while lookups and replica selection happen on every client connection.
//! Everything structural, including the rotation cursor, sits behind one
//! mutex. Backends are handed out as `Arc<Backend>` so a handle can never
//! dangle; a handle to a removed backend reports `is_retired()` and its
//! pools refuse new connections.

use crate::backend::address::split_weight;
use crate::backend::{
    AddressResolver, Backend, BackendRole, BackendSnapshot, RegistryError, SystemResolver,
    WeightedRotation, WorkerMap,
};
use crate::config::BackendsConfig;
use crate::metrics::{MetricsCollector, Operation, OperationResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Ordered collection of backends plus the replica rotation state.
///
/// Read/write backends always occupy a contiguous prefix of the index space
/// and read-only backends the suffix, and no two backends share the same
/// (address, role) pair.
pub struct BackendRegistry {
    inner: Mutex<RegistryInner>,
    workers: WorkerMap,
    resolver: Arc<dyn AddressResolver>,
    metrics: Option<MetricsCollector>,
}

struct RegistryInner {
    backends: Vec<Arc<Backend>>,
    rotation: WeightedRotation,
}

/// Outcome of reconciling the registry against a backend list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Addresses of backends added.
    pub added: Vec<String>,
    /// Addresses of backends removed.
    pub removed: Vec<String>,
    /// Backends left in place.
    pub unchanged: usize,
    /// Entries that could not be applied.
    pub errors: Vec<RegistryError>,
}

impl ReconcileReport {
    /// Whether the registry changed.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

impl RegistryInner {
    /// Index of the first read-only backend, i.e. the number of read/write ones.
    fn read_only_start(&self) -> usize {
        self.backends
            .partition_point(|b| b.role() == BackendRole::ReadWrite)
    }

    fn refresh_rotation(&mut self) {
        let start = self.read_only_start();
        let max_weight = self.backends[start..]
            .iter()
            .map(|b| b.weight())
            .max()
            .unwrap_or(0);
        self.rotation.reset(max_weight);
    }

    /// Insert keeping the read/write prefix intact. Returns the final index.
    fn insert(&mut self, backend: Arc<Backend>) -> Result<usize, RegistryError> {
        let mut first_read_only = None;

        for (index, existing) in self.backends.iter().enumerate() {
            if first_read_only.is_none() && existing.role() == BackendRole::ReadOnly {
                first_read_only = Some(index);
            }

            if existing.address() == backend.address() && existing.role() == backend.role() {
                return Err(RegistryError::DuplicateBackend {
                    address: backend.address().to_string(),
                    role: backend.role(),
                });
            }
        }

        let role = backend.role();
        self.backends.push(backend);
        let mut index = self.backends.len() - 1;

        // The new primary takes the first replica's slot; that replica moves to the tail.
        if role == BackendRole::ReadWrite {
            if let Some(slot) = first_read_only {
                self.backends.swap(slot, index);
                index = slot;
            }
        }

        if role == BackendRole::ReadOnly || first_read_only.is_some() {
            self.refresh_rotation();
        }

        Ok(index)
    }

    fn remove(&mut self, index: usize) -> Arc<Backend> {
        let backend = self.backends.remove(index);
        if backend.role() == BackendRole::ReadOnly {
            self.refresh_rotation();
        }
        backend
    }

    fn role_counts(&self) -> (usize, usize) {
        let read_write = self.read_only_start();
        (read_write, self.backends.len() - read_write)
    }
}

impl BackendRegistry {
    /// Create an empty registry with `thread_count` pool slots per backend.
    pub fn new(thread_count: usize) -> Self {
        Self::with_resolver(thread_count, Arc::new(SystemResolver::new()))
    }

    /// Create an empty registry using a custom address resolver.
    pub fn with_resolver(thread_count: usize, resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                backends: Vec::new(),
                rotation: WeightedRotation::new(),
            }),
            workers: WorkerMap::new(thread_count),
            resolver,
            metrics: None,
        }
    }

    /// Report membership and selections to `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        let inner = self.inner.get_mut();
        let (read_write, read_only) = inner.role_counts();
        metrics.set_backend_counts(read_write, read_only);
        for backend in &inner.backends[read_write..] {
            backend.attach_selection_counter(
                metrics.selection_counter(&backend.address().to_string()),
            );
        }
        self.metrics = Some(metrics);
        self
    }

    /// Pool slots per backend, fixed for the registry's lifetime.
    pub fn thread_count(&self) -> usize {
        self.workers.capacity()
    }

    /// Worker-thread to pool-slot mapping.
    pub fn workers(&self) -> &WorkerMap {
        &self.workers
    }

    /// Add a backend from an address spec.
    ///
    /// Read-only specs may end in `@weight`. Resolution happens before the
    /// lock is taken; on any failure the registry is left untouched.
    pub fn add(&self, spec: &str, role: BackendRole) -> Result<(), RegistryError> {
        let result = self.build(spec, role).and_then(|backend| {
            let address = backend.address().to_string();
            let weight = backend.weight();

            let mut inner = self.inner.lock();
            let index = inner.insert(Arc::clone(&backend))?;
            self.track(&backend);
            self.publish_counts(&inner);
            drop(inner);

            info!(backend = %address, role = %role, weight, index, "added backend");
            Ok(())
        });

        match &result {
            Err(e @ RegistryError::DuplicateBackend { .. }) => {
                error!(spec, error = %e, "backend is already known");
            }
            Err(e) => warn!(spec, error = %e, "rejected backend"),
            Ok(()) => {}
        }

        self.record(Operation::Add, &result);
        result
    }

    /// Remove the backend at `index`, shifting later backends down by one.
    ///
    /// The removed backend is retired: its idle pooled connections are closed
    /// and outstanding handles see `is_retired() == true`.
    pub fn remove(&self, index: usize) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let count = inner.backends.len();

        if index >= count {
            drop(inner);
            let err = RegistryError::IndexOutOfRange { index, count };
            warn!(index, count, "cannot remove backend, index out of range");
            let result = Err(err);
            self.record(Operation::Remove, &result);
            return result;
        }

        let backend = inner.remove(index);
        self.untrack(&backend);
        self.publish_counts(&inner);
        drop(inner);

        let closed = backend.retire();
        info!(
            backend = %backend.address(),
            role = %backend.role(),
            index,
            closed_connections = closed,
            "removed backend"
        );

        let result = Ok(());
        self.record(Operation::Remove, &result);
        result
    }

    /// Handle to the backend at `index`, or `None` if out of range.
    pub fn get(&self, index: usize) -> Option<Arc<Backend>> {
        self.inner.lock().backends.get(index).cloned()
    }

    /// Run `f` on the backend at `index` while holding the registry lock.
    ///
    /// `f` must not call back into the registry.
    pub fn with_backend<R>(&self, index: usize, f: impl FnOnce(&Backend) -> R) -> Option<R> {
        let inner = self.inner.lock();
        inner.backends.get(index).map(|b| f(b.as_ref()))
    }

    /// Number of backends.
    pub fn count(&self) -> usize {
        self.inner.lock().backends.len()
    }

    /// Pick the next read-only backend by weighted rotation.
    ///
    /// Backends that are `Down` or `Offline` are skipped. Returns `None` when
    /// no read-only backend is eligible.
    pub fn select(&self) -> Option<Arc<Backend>> {
        let selected = {
            let mut guard = self.inner.lock();
            let start = guard.read_only_start();
            let RegistryInner { backends, rotation } = &mut *guard;
            let replicas = &backends[start..];

            rotation
                .next(replicas.len(), |i| {
                    let backend = &replicas[i];
                    if backend.state().is_routable() {
                        backend.weight()
                    } else {
                        0
                    }
                })
                .map(|i| Arc::clone(&replicas[i]))
        };

        match &selected {
            Some(backend) => {
                debug!(backend = %backend.address(), "selected read-only backend");
                backend.record_selection();
            }
            None => debug!("no read-only backend available"),
        }

        selected
    }

    /// First read/write backend that is not `Down` or `Offline`.
    pub fn primary(&self) -> Option<Arc<Backend>> {
        let inner = self.inner.lock();
        inner
            .backends
            .iter()
            .take_while(|b| b.role() == BackendRole::ReadWrite)
            .find(|b| b.state().is_routable())
            .cloned()
    }

    /// Copies of every backend's fields, in index order.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        let inner = self.inner.lock();
        inner.backends.iter().map(|b| b.snapshot()).collect()
    }

    /// Bring the registry in line with `config`.
    ///
    /// Backends that are no longer listed, or whose weight changed, are
    /// removed; listed backends that are missing are added. Entries that fail
    /// to parse or resolve are reported and skipped.
    pub fn reconcile(&self, config: &BackendsConfig) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let entries = config
            .read_write
            .iter()
            .map(|spec| (spec, BackendRole::ReadWrite))
            .chain(config.read_only.iter().map(|spec| (spec, BackendRole::ReadOnly)));

        let mut desired: Vec<Arc<Backend>> = Vec::new();
        for (spec, role) in entries {
            let built = self.build(spec, role).and_then(|backend| {
                let repeated = desired.iter().any(|d| {
                    d.address() == backend.address() && d.role() == backend.role()
                });
                if repeated {
                    Err(RegistryError::DuplicateBackend {
                        address: backend.address().to_string(),
                        role,
                    })
                } else {
                    Ok(backend)
                }
            });

            match built {
                Ok(backend) => desired.push(backend),
                Err(e) => {
                    warn!(spec = %spec, error = %e, "skipping backend during reconcile");
                    report.errors.push(e);
                }
            }
        }

        let mut removed = Vec::new();
        {
            let mut inner = self.inner.lock();

            inner.backends.retain(|existing| {
                let keep = desired.iter().any(|d| same_backend(existing, d));
                if !keep {
                    self.untrack(existing);
                    removed.push(Arc::clone(existing));
                }
                keep
            });

            for backend in desired {
                if inner.backends.iter().any(|existing| same_backend(existing, &backend)) {
                    report.unchanged += 1;
                    continue;
                }

                match inner.insert(Arc::clone(&backend)) {
                    Ok(_) => {
                        self.track(&backend);
                        report.added.push(backend.address().to_string());
                    }
                    Err(e) => report.errors.push(e),
                }
            }

            if !removed.is_empty() {
                inner.refresh_rotation();
            }
            self.publish_counts(&inner);
        }

        for backend in &removed {
            backend.retire();
            report.removed.push(backend.address().to_string());
        }

        if report.has_changes() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                unchanged = report.unchanged,
                errors = report.errors.len(),
                "reconciled backends"
            );
        }

        report
    }

    fn build(&self, spec: &str, role: BackendRole) -> Result<Arc<Backend>, RegistryError> {
        let (address_spec, weight) = split_weight(spec, role)?;
        let address = self.resolver.resolve(address_spec)?;
        Ok(Arc::new(Backend::new(
            address,
            role,
            weight,
            self.thread_count(),
        )))
    }

    /// Give a read-only backend its selection counter.
    fn track(&self, backend: &Backend) {
        if let (Some(metrics), BackendRole::ReadOnly) = (&self.metrics, backend.role()) {
            let address = backend.address().to_string();
            backend.attach_selection_counter(metrics.selection_counter(&address));
        }
    }

    fn untrack(&self, backend: &Backend) {
        if let (Some(metrics), BackendRole::ReadOnly) = (&self.metrics, backend.role()) {
            metrics.remove_selection_counter(&backend.address().to_string());
        }
    }

    fn publish_counts(&self, inner: &RegistryInner) {
        if let Some(metrics) = &self.metrics {
            let (read_write, read_only) = inner.role_counts();
            metrics.set_backend_counts(read_write, read_only);
        }
    }

    fn record(&self, operation: Operation, result: &Result<(), RegistryError>) {
        if let Some(metrics) = &self.metrics {
            let outcome = match result {
                Ok(()) => OperationResult::Success,
                Err(RegistryError::DuplicateBackend { .. }) => OperationResult::Duplicate,
                Err(RegistryError::IndexOutOfRange { .. }) => OperationResult::OutOfRange,
                Err(_) => OperationResult::Invalid,
            };
            metrics.record_operation(operation, outcome);
        }
    }
}

/// Same address, role and weight.
fn same_backend(a: &Backend, b: &Backend) -> bool {
    a.address() == b.address() && a.role() == b.role() && a.weight() == b.weight()
}

impl Drop for BackendRegistry {
    fn drop(&mut self) {
        let metrics = self.metrics.take();
        let inner = self.inner.get_mut();
        let count = inner.backends.len();
        let mut closed = 0;
        for backend in inner.backends.drain(..) {
            closed += backend.retire();
            if let Some(metrics) = &metrics {
                if backend.role() == BackendRole::ReadOnly {
                    metrics.remove_selection_counter(&backend.address().to_string());
                }
            }
        }
        inner.rotation.reset(0);
        debug!(backends = count, closed_connections = closed, "backend registry torn down");
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.count())
            .field("thread_count", &self.thread_count())
            .finish()
    }
}
