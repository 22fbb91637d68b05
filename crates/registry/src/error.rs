//! Registry error types.

use casket_storage::StorageError;
use casket_ticket::{TicketError, TicketKind};
use thiserror::Error;

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Failures of the ticket registry and its coordination strategies.
///
/// Ticket ids embedded in these errors are already redacted.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The backing store did not answer in time or could not be reached.
    ///
    /// This says nothing about whether the ticket exists.
    #[error("ticket registry unavailable: {source}")]
    Unavailable {
        #[source]
        source: StorageError,
    },

    /// Another writer changed the ticket since it was read.
    #[error("concurrent modification of ticket {id}")]
    Conflict { id: String },

    /// A ticket with this id is already stored.
    #[error("ticket {id} already exists")]
    Duplicate { id: String },

    /// An update targeted a ticket that is not stored.
    #[error("ticket {id} not found")]
    NotFound { id: String },

    /// The stored ticket is of a different kind than requested.
    #[error("ticket {id} is a {actual} ticket, expected {expected}")]
    UnexpectedType { id: String, expected: TicketKind, actual: TicketKind },

    /// Walking granting-ticket links exceeded the depth guard.
    #[error("ticket chain starting at {id} exceeds {max_depth} links")]
    ChainTooDeep { id: String, max_depth: usize },

    /// Stored bytes could not be decoded.
    #[error("stored ticket could not be decoded: {source}")]
    Serialization {
        #[source]
        source: StorageError,
    },

    /// The ticket model rejected an operation.
    #[error(transparent)]
    Ticket(#[from] TicketError),

    /// Any other storage failure.
    #[error("storage failure: {source}")]
    Storage {
        #[source]
        source: StorageError,
    },
}

impl RegistryError {
    /// Maps a storage failure on ticket `id` (already redacted).
    pub fn from_storage(err: StorageError, id: &str) -> Self {
        match err {
            StorageError::Timeout | StorageError::Connection { .. } => Self::Unavailable { source: err },
            StorageError::Conflict => Self::Conflict { id: id.to_owned() },
            StorageError::Serialization { .. } => Self::Serialization { source: err },
            other => Self::Storage { source: other },
        }
    }

    /// Whether the failure is an infrastructure outage.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        Self::from_storage(err, "<unknown>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_unavailable_not_missing() {
        let err = RegistryError::from_storage(StorageError::timeout(), "ST-1-ab****");
        assert!(err.is_unavailable());
        assert!(!matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn conflicts_keep_the_redacted_id() {
        let err = RegistryError::from_storage(StorageError::conflict(), "ST-1-ab****");
        assert_eq!(err.to_string(), "concurrent modification of ticket ST-1-ab****");
    }
}
