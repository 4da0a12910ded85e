//! Errors returned by registry operations.

use crate::backend::{BackendRole, MAX_WEIGHT};
use thiserror::Error;

/// Errors that can occur while mutating or querying the backend registry.
///
/// All variants are local and synchronous. The registry never retries on its
/// own; the administrative caller decides what to do with corrected input.
///
/// A malformed `@weight` suffix is reported as `InvalidWeight` instead of being
/// read as weight 0, which would register a replica that is never selected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid backend address '{spec}': {reason}")]
    InvalidAddress { spec: String, reason: String },

    #[error("invalid weight '{weight}' for backend '{spec}' (must be an integer from 1 to {max})", max = MAX_WEIGHT)]
    InvalidWeight { spec: String, weight: String },

    #[error("{role} backend {address} is already known")]
    DuplicateBackend { address: String, role: BackendRole },

    #[error("backend index {index} out of range ({count} backends)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("worker {index} out of range ({capacity} worker slots)")]
    WorkerOutOfRange { index: usize, capacity: usize },

    #[error("all {capacity} worker slots are already bound")]
    WorkersExhausted { capacity: usize },
}

impl RegistryError {
    /// Build an `InvalidAddress` error.
    pub(crate) fn invalid_address(spec: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}
