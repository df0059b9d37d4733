//! Error types for store operations.

use entigroup_codec::{CodecError, StoreKey};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`crate::Datastore`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No entity exists under the key.
    #[error("entity not found: {key}")]
    EntityNotFound {
        /// The missing key.
        key: StoreKey,
    },

    /// A transaction touched a second entity group.
    #[error("transaction is bound to entity group {expected}, cannot touch {actual}")]
    CrossGroup {
        /// Root key of the group the transaction is bound to.
        expected: StoreKey,
        /// Root key of the group that was touched.
        actual: StoreKey,
    },

    /// Another writer committed to the group first. Retryable.
    #[error("concurrent modification of entity group {group}")]
    ConcurrentTransaction {
        /// Root key of the contended group.
        group: StoreKey,
    },

    /// The referenced transaction is not open on this handle.
    #[error("transaction {id} is not active")]
    TransactionNotActive {
        /// Transaction id.
        id: String,
    },

    /// A transaction is already open on this handle.
    #[error("a transaction is already active on this handle")]
    TransactionAlreadyActive,

    /// The operation is not supported.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Name of the operation.
        operation: String,
    },

    /// Opaque backend failure (network, quota, deadline).
    #[error("backend failure: {0}")]
    Backend(String),

    /// Key or value codec failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StoreError {
    /// Creates an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Creates a backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Returns true if retrying the enclosing transaction may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentTransaction { .. } | Self::Backend(_))
    }
}
