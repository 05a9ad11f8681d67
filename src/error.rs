//! Error types for the task registry.
//!
//! Capacity and ownership errors are returned to the immediate caller and
//! never retried here. Lineage corruption is reported but normally absorbed
//! by the query layer (see [`crate::core::lineage`]).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task registry is full ({capacity} slots)")]
    CapacityExceeded { capacity: usize },
    #[error("slot {slot} is not owned by the caller or is no longer occupied")]
    InvalidSlot { slot: usize },
    #[error("lineage of slot {slot} is corrupted (cycle detected after {hops} hops)")]
    CorruptedLineage { slot: usize, hops: usize },
    #[error("shared task table error: {0}")]
    Shared(String),
    #[error("shared lock failed: {0}")]
    Lock(String),
}

impl RegistryError {
    /// True for errors caused by the caller's use of the API rather than the
    /// state of the shared table.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            RegistryError::CapacityExceeded { .. } | RegistryError::InvalidSlot { .. }
        )
    }
}

impl From<crate::core::shared_table::SharedTableError> for RegistryError {
    fn from(value: crate::core::shared_table::SharedTableError) -> Self {
        match value {
            crate::core::shared_table::SharedTableError::LockInit(message)
            | crate::core::shared_table::SharedTableError::LockGuard(message) => {
                RegistryError::Lock(message)
            }
            other => RegistryError::Shared(other.to_string()),
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
