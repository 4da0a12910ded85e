//! Backend registry, per-worker connection pools and replica rotation.

mod address;
mod error;
mod pool;
mod registry;
mod rotation;
mod server;
mod workers;

pub use address::{
    split_weight, AddressResolver, BackendAddress, SystemResolver, DEFAULT_PORT, DEFAULT_WEIGHT,
    MAX_WEIGHT,
};
pub use error::RegistryError;
pub use pool::{ConnectionPool, PooledConnection};
pub use registry::{BackendRegistry, ReconcileReport};
pub use rotation::WeightedRotation;
pub use server::{Backend, BackendRole, BackendSnapshot, BackendState};
pub use workers::{WorkerId, WorkerMap};
