//! Mapping from worker threads to connection pool slots.

use crate::backend::RegistryError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

/// Index of a worker's pool slot, validated against the registry's thread count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    /// Slot index inside a backend's pool array.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Fixed-capacity assignment of OS threads to pool slots.
///
/// The capacity is set once, when the registry is built. Changing the worker
/// count means building a new registry.
#[derive(Debug)]
pub struct WorkerMap {
    capacity: usize,
    bound: DashMap<ThreadId, WorkerId>,
    next: AtomicUsize,
}

impl WorkerMap {
    /// Create a map with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bound: DashMap::new(),
            next: AtomicUsize::new(0),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of threads bound so far.
    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }

    /// Bind the calling thread to the next free slot.
    ///
    /// Calling again from an already bound thread returns its existing slot.
    pub fn bind_current(&self) -> Result<WorkerId, RegistryError> {
        match self.bound.entry(thread::current().id()) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let capacity = self.capacity;
                let index = self
                    .next
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < capacity).then_some(n + 1)
                    })
                    .map_err(|_| RegistryError::WorkersExhausted { capacity })?;

                let id = WorkerId(index);
                entry.insert(id);
                tracing::debug!(worker = %id, "bound worker thread to pool slot");
                Ok(id)
            }
        }
    }

    /// Slot bound to the calling thread, if any.
    pub fn current(&self) -> Option<WorkerId> {
        self.bound.get(&thread::current().id()).map(|id| *id)
    }

    /// Explicit slot id for callers that manage their own thread assignment.
    pub fn worker(&self, index: usize) -> Result<WorkerId, RegistryError> {
        if index < self.capacity {
            Ok(WorkerId(index))
        } else {
            Err(RegistryError::WorkerOutOfRange {
                index,
                capacity: self.capacity,
            })
        }
    }
}
