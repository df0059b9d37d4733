//! Exception translation for store failures.
//!
//! Store cursors fetch lazily, so a failure can surface on any call while
//! iterating. [`ExceptionTranslatingIterator`] guards each call so those
//! failures reach the caller in the same vocabulary as failures raised by
//! synchronous operations.

use crate::config::ApiFlavor;
use entigroup_storage::{Entity, EntityCursor, StoreError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Category of a translated failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslatedKind {
    /// The requested entity does not exist.
    ObjectNotFound,
    /// A concurrent writer won; the caller may retry the transaction.
    Optimistic,
    /// Any other store failure.
    DataStore,
    /// The store does not support the operation.
    Unsupported,
}

impl TranslatedKind {
    /// Classifies a store error.
    #[must_use]
    pub fn of(err: &StoreError) -> Self {
        match err {
            StoreError::EntityNotFound { .. } => Self::ObjectNotFound,
            StoreError::ConcurrentTransaction { .. } => Self::Optimistic,
            StoreError::Unsupported { .. } => Self::Unsupported,
            StoreError::CrossGroup { .. }
            | StoreError::TransactionNotActive { .. }
            | StoreError::TransactionAlreadyActive
            | StoreError::Backend(_)
            | StoreError::Codec(_) => Self::DataStore,
        }
    }
}

/// Returns the exception name a caller of the given API family expects.
#[must_use]
pub fn exception_name(flavor: ApiFlavor, kind: TranslatedKind) -> &'static str {
    match (flavor, kind) {
        (ApiFlavor::Jdo, TranslatedKind::ObjectNotFound) => "JDOObjectNotFoundException",
        (ApiFlavor::Jdo, TranslatedKind::Optimistic) => "JDOOptimisticVerificationException",
        (ApiFlavor::Jdo, TranslatedKind::DataStore) => "JDODataStoreException",
        (ApiFlavor::Jdo, TranslatedKind::Unsupported) => "JDOUnsupportedOptionException",
        (ApiFlavor::Jpa, TranslatedKind::ObjectNotFound) => "EntityNotFoundException",
        (ApiFlavor::Jpa, TranslatedKind::Optimistic) => "OptimisticLockException",
        (ApiFlavor::Jpa, TranslatedKind::DataStore) => "PersistenceException",
        (ApiFlavor::Jpa, TranslatedKind::Unsupported) => "UnsupportedOperationException",
    }
}

/// A store failure in the calling API's vocabulary.
///
/// The original failure stays reachable through
/// [`std::error::Error::source`].
#[derive(Debug, Clone, Error)]
#[error("{name}: {cause}")]
pub struct TranslatedError {
    flavor: ApiFlavor,
    kind: TranslatedKind,
    name: &'static str,
    #[source]
    cause: StoreError,
}

impl TranslatedError {
    /// Translates a store error.
    #[must_use]
    pub fn new(flavor: ApiFlavor, cause: StoreError) -> Self {
        let kind = TranslatedKind::of(&cause);
        Self {
            flavor,
            kind,
            name: exception_name(flavor, kind),
            cause,
        }
    }

    /// Returns the API family.
    #[must_use]
    pub fn flavor(&self) -> ApiFlavor {
        self.flavor
    }

    /// Returns the failure category.
    #[must_use]
    pub fn kind(&self) -> TranslatedKind {
        self.kind
    }

    /// Returns the exception name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the original store failure.
    #[must_use]
    pub fn cause(&self) -> &StoreError {
        &self.cause
    }

    /// Returns true if retrying the enclosing transaction may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}

/// Notified of every store failure raised during iteration, before it is
/// translated and re-raised.
pub trait FailureObserver: Send + Sync {
    /// Called once per failed cursor call.
    fn on_failure(&self, err: &StoreError);
}

/// Observer that ignores failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FailureObserver for NoopObserver {
    fn on_failure(&self, _err: &StoreError) {}
}

/// Wraps a store cursor so that every call is guarded.
///
/// Each `has_next`, `next` or `remove` reaches the underlying cursor
/// exactly once. A failure is reported to the observer, then returned as a
/// [`TranslatedError`].
pub struct ExceptionTranslatingIterator {
    inner: Box<dyn EntityCursor>,
    flavor: ApiFlavor,
    observer: Arc<dyn FailureObserver>,
}

impl ExceptionTranslatingIterator {
    /// Wraps a cursor.
    pub fn new(
        inner: Box<dyn EntityCursor>,
        flavor: ApiFlavor,
        observer: Arc<dyn FailureObserver>,
    ) -> Self {
        Self {
            inner,
            flavor,
            observer,
        }
    }

    /// Returns true if another entity is available.
    pub fn has_next(&mut self) -> Result<bool, TranslatedError> {
        let result = self.inner.has_next();
        self.guard(result)
    }

    /// Removes the entity most recently returned.
    pub fn remove(&mut self) -> Result<(), TranslatedError> {
        let result = self.inner.remove();
        self.guard(result)
    }

    fn guard<T>(&self, result: Result<T, StoreError>) -> Result<T, TranslatedError> {
        result.map_err(|err| {
            debug!(error = %err, "store failure during iteration");
            self.observer.on_failure(&err);
            TranslatedError::new(self.flavor, err)
        })
    }
}

impl Iterator for ExceptionTranslatingIterator {
    type Item = Result<Entity, TranslatedError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.inner.next_entity();
        self.guard(result).transpose()
    }
}

impl fmt::Debug for ExceptionTranslatingIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionTranslatingIterator")
            .field("flavor", &self.flavor)
            .finish_non_exhaustive()
    }
}
