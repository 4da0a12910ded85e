//! A single downstream database server.

use crate::backend::{BackendAddress, ConnectionPool, RegistryError, WorkerId};
use parking_lot::RwLock;
use prometheus_client::metrics::counter::Counter;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Role of a backend in the replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendRole {
    /// Primary, accepts writes.
    ReadWrite,
    /// Replica, takes part in weighted read rotation.
    ReadOnly,
}

impl BackendRole {
    /// Short label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendRole::ReadWrite => "read_write",
            BackendRole::ReadOnly => "read_only",
        }
    }
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendRole::ReadWrite => "read/write",
            BackendRole::ReadOnly => "read-only",
        })
    }
}

/// Availability as last reported by a health layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    /// Never checked.
    Unknown = 0,
    /// Reachable.
    Up = 1,
    /// Unreachable.
    Down = 2,
    /// Taken out of service by an operator.
    Offline = 3,
}

impl BackendState {
    /// Whether traffic may be routed to a backend in this state.
    pub fn is_routable(self) -> bool {
        matches!(self, BackendState::Unknown | BackendState::Up)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => BackendState::Up,
            2 => BackendState::Down,
            3 => BackendState::Offline,
            _ => BackendState::Unknown,
        }
    }
}

/// One downstream server with its per-worker connection pools.
///
/// Backends are owned by the registry and handed out as `Arc<Backend>`. A
/// handle outliving removal sees `is_retired() == true` and closed pools.
pub struct Backend {
    address: BackendAddress,
    identifier: RwLock<String>,
    role: BackendRole,
    weight: u32,
    state: AtomicU8,
    connected_clients: AtomicUsize,
    pools: Box<[ConnectionPool]>,
    retired: AtomicBool,
    selections: OnceLock<Counter>,
}

impl Backend {
    /// Create a backend with `thread_count` empty pools.
    pub fn new(address: BackendAddress, role: BackendRole, weight: u32, thread_count: usize) -> Self {
        let weight = match role {
            BackendRole::ReadWrite => 0,
            BackendRole::ReadOnly => weight,
        };

        Self {
            address,
            identifier: RwLock::new(String::new()),
            role,
            weight,
            state: AtomicU8::new(BackendState::Unknown as u8),
            connected_clients: AtomicUsize::new(0),
            pools: (0..thread_count).map(|_| ConnectionPool::new()).collect(),
            retired: AtomicBool::new(false),
            selections: OnceLock::new(),
        }
    }

    pub fn address(&self) -> &BackendAddress {
        &self.address
    }

    pub fn role(&self) -> BackendRole {
        self.role
    }

    /// Rotation weight; always 0 for read/write backends.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Informational identifier such as the server UUID.
    pub fn identifier(&self) -> String {
        self.identifier.read().clone()
    }

    pub fn set_identifier(&self, identifier: impl Into<String>) {
        *self.identifier.write() = identifier.into();
    }

    pub fn state(&self) -> BackendState {
        BackendState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: BackendState) {
        let previous = BackendState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::info!(
                backend = %self.address,
                from = ?previous,
                to = ?state,
                "backend state changed"
            );
        }
    }

    /// Read-only and currently routable.
    pub fn is_rotation_eligible(&self) -> bool {
        self.role == BackendRole::ReadOnly && self.state().is_routable()
    }

    /// Whether the registry has removed this backend.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Number of pool slots. Equals the registry's thread count.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Pool slot for `worker`.
    pub fn pool(&self, worker: WorkerId) -> Result<&ConnectionPool, RegistryError> {
        self.pools
            .get(worker.index())
            .ok_or(RegistryError::WorkerOutOfRange {
                index: worker.index(),
                capacity: self.pools.len(),
            })
    }

    /// Idle connections across every slot.
    pub fn idle_connections(&self) -> usize {
        self.pools.iter().map(ConnectionPool::idle_count).sum()
    }

    pub fn client_connected(&self) {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        // Prevent underflow
        let _ = self
            .connected_clients
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn connected_clients(&self) -> usize {
        self.connected_clients.load(Ordering::Relaxed)
    }

    /// Attach the counter bumped each time rotation picks this backend.
    /// Only the first attached counter is kept.
    pub(crate) fn attach_selection_counter(&self, counter: Counter) {
        let _ = self.selections.set(counter);
    }

    pub(crate) fn record_selection(&self) {
        if let Some(counter) = self.selections.get() {
            counter.inc();
        }
    }

    /// Mark the backend removed and close every idle pooled connection.
    ///
    /// Idempotent. Returns the number of connections closed by this call.
    pub fn retire(&self) -> usize {
        self.retired.store(true, Ordering::Release);
        self.pools.iter().map(ConnectionPool::close).sum()
    }

    /// Immutable copy of the backend's current fields.
    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            address: self.address.to_string(),
            identifier: self.identifier(),
            role: self.role,
            weight: self.weight,
            state: self.state(),
            connected_clients: self.connected_clients(),
            idle_connections: self.idle_connections(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("address", &self.address)
            .field("role", &self.role)
            .field("weight", &self.weight)
            .field("state", &self.state())
            .field("pools", &self.pools.len())
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// Point-in-time copy of a backend, safe to hold across registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub address: String,
    pub identifier: String,
    pub role: BackendRole,
    pub weight: u32,
    pub state: BackendState,
    pub connected_clients: usize,
    pub idle_connections: usize,
}

impl fmt::Display for BackendSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] weight={} state={:?} clients={} idle={}",
            self.address, self.role, self.weight, self.state, self.connected_clients, self.idle_connections
        )
    }
}
