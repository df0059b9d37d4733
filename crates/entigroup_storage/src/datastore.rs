//! The datastore service contract.

use crate::cursor::EntityCursor;
use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use entigroup_codec::StoreKey;
use std::fmt;
use uuid::Uuid;

/// Handle to an open store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(Uuid);

impl TransactionHandle {
    /// Creates a handle with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// A hierarchical key-value store whose unit of consistency is the entity group.
///
/// Operations run inside the handle's current transaction when one is open,
/// and are applied immediately otherwise. A transaction may touch exactly one
/// entity group.
///
/// # Implementors
///
/// - [`crate::InMemoryDatastore`] - For tests and embedded use
pub trait Datastore: Send + Sync {
    /// Writes an entity, completing its key if it has no identity yet.
    ///
    /// Returns the complete key.
    fn put(&self, entity: &mut Entity) -> StoreResult<StoreKey>;

    /// Reads an entity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EntityNotFound`] if nothing is stored under `key`.
    fn get(&self, key: &StoreKey) -> StoreResult<Entity>;

    /// Deletes an entity. Deleting a missing key is not an error.
    fn delete(&self, key: &StoreKey) -> StoreResult<()>;

    /// Runs a query and returns a cursor over the results.
    fn query(&self, query: &Query) -> StoreResult<Box<dyn EntityCursor>>;

    /// Opens a transaction on this handle.
    fn begin_transaction(&self) -> StoreResult<TransactionHandle>;

    /// Commits an open transaction.
    fn commit(&self, txn: &TransactionHandle) -> StoreResult<()>;

    /// Rolls back an open transaction, discarding its writes.
    fn rollback(&self, txn: &TransactionHandle) -> StoreResult<()>;

    /// Returns the transaction currently open on this handle, if any.
    fn current_transaction(&self) -> Option<TransactionHandle>;

    /// Reads an entity, mapping a missing key to `None`.
    fn get_opt(&self, key: &StoreKey) -> StoreResult<Option<Entity>> {
        match self.get(key) {
            Ok(entity) => Ok(Some(entity)),
            Err(StoreError::EntityNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
