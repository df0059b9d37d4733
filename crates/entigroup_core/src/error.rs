//! Error types for the mapping core.

use crate::translate::TranslatedError;
use entigroup_codec::{CodecError, StoreKey};
use entigroup_storage::StoreError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while mapping objects to and from the store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A key was given both a numeric id and a name, or neither.
    #[error("invalid key identity: {message}")]
    InvalidIdentity {
        /// Description of the identity problem.
        message: String,
    },

    /// A key string could not be decoded.
    #[error("malformed key: {message}")]
    MalformedKey {
        /// Description of the decoding problem.
        message: String,
    },

    /// A field has a type the store cannot represent.
    ///
    /// Raised when metadata is registered, never while persisting.
    #[error("field {class}.{field} has unsupported type {type_name}")]
    UnsupportedFieldType {
        /// Owning class.
        class: String,
        /// Field name.
        field: String,
        /// The rejected type.
        type_name: String,
    },

    /// Class metadata is structurally invalid.
    #[error("invalid metadata for {class}: {message}")]
    InvalidMetadata {
        /// Offending class.
        class: String,
        /// Description of the problem.
        message: String,
    },

    /// The stored version no longer matches the object's last-known version.
    #[error("concurrent modification of {key}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        /// Key of the modified entity.
        key: StoreKey,
        /// Version the object was loaded with.
        expected: i64,
        /// Version currently in the store.
        actual: i64,
    },

    /// A one-to-one ancestor query found more than one child.
    #[error("one-to-one field {field} of {owner} resolved to {found} entities")]
    AmbiguousOneToOne {
        /// Key of the owning entity.
        owner: StoreKey,
        /// Relation field name.
        field: String,
        /// Number of children found (capped by the query limit).
        found: usize,
    },

    /// Ancestor or cascade misuse, detected before any write.
    #[error("illegal argument: {message}")]
    IllegalArgument {
        /// Description of the misuse.
        message: String,
    },

    /// A relation referred to an object that has not been flushed yet.
    #[error("field {class}.{field} refers to an object that is not yet flushed")]
    NotYetFlushed {
        /// Owning class.
        class: String,
        /// Relation field name.
        field: String,
    },

    /// An ancestor-provided relation was read from an entity with no parent.
    #[error("field {class}.{field} expects a parent key, but the entity is a root")]
    MissingAncestor {
        /// Owning class.
        class: String,
        /// Relation field name.
        field: String,
    },

    /// No class is registered under the name.
    #[error("unknown class: {name}")]
    UnknownClass {
        /// Class name or kind.
        name: String,
    },

    /// The class has no field of that name.
    #[error("unknown field {class}.{field}")]
    UnknownField {
        /// Class name.
        class: String,
        /// Field name.
        field: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Store failure in the calling API's vocabulary.
    #[error(transparent)]
    Translated(#[from] TranslatedError),

    /// Untranslated store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Codec failure other than identity and key-format problems.
    #[error("codec error: {0}")]
    Codec(CodecError),
}

impl CoreError {
    /// Creates an illegal argument error.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid metadata error.
    pub fn invalid_metadata(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(class: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            class: class.into(),
            field: field.into(),
        }
    }

    /// Creates a not-yet-flushed error.
    pub fn not_yet_flushed(class: impl Into<String>, field: impl Into<String>) -> Self {
        Self::NotYetFlushed {
            class: class.into(),
            field: field.into(),
        }
    }
}

impl From<CodecError> for CoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::InvalidIdentity { message } => Self::InvalidIdentity { message },
            CodecError::MalformedKey { message } => Self::MalformedKey { message },
            other => Self::Codec(other),
        }
    }
}
