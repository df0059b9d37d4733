//! Bridge between logical transactions and store transactions.

use crate::error::{CoreError, CoreResult};
use entigroup_storage::Datastore;
use std::sync::Arc;
use tracing::{debug, warn};

/// State of the logical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started.
    Inactive,
    /// The transaction is open.
    Active,
    /// The transaction was committed.
    Committed,
    /// The transaction was rolled back.
    RolledBack,
}

/// Keeps a logical transaction and the store's transaction in step.
///
/// With eager start, `begin` opens the store transaction at once rather than
/// on first store access, so work scheduled right after `begin` can enlist
/// in it. `commit` and `rollback` finish the logical transaction first, then
/// close the store transaction only if it is still open: direct entity
/// operations may already have closed it.
pub struct TransactionBridge {
    store: Arc<dyn Datastore>,
    state: TransactionState,
    eager: bool,
}

impl TransactionBridge {
    /// Creates a bridge in the [`TransactionState::Inactive`] state.
    pub fn new(store: Arc<dyn Datastore>, eager: bool) -> Self {
        Self {
            store,
            state: TransactionState::Inactive,
            eager,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while the logical transaction is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Begins a logical transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if one is already active, or
    /// the store's error if the eager start fails. A failed start leaves the
    /// bridge inactive.
    pub fn begin(&mut self) -> CoreResult<()> {
        if self.is_active() {
            return Err(CoreError::invalid_operation("transaction already active"));
        }
        self.state = TransactionState::Active;
        if self.eager {
            if let Err(err) = self.ensure_started() {
                self.state = TransactionState::Inactive;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Opens the store transaction if the logical one is active and the
    /// store has none open yet.
    pub fn ensure_started(&mut self) -> CoreResult<()> {
        if self.is_active() && self.store.current_transaction().is_none() {
            let txn = self.store.begin_transaction()?;
            debug!(id = %txn, "started datastore transaction");
        }
        Ok(())
    }

    /// Commits the logical transaction and any store transaction still open.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if no transaction is active.
    /// If the store commit fails, the state becomes
    /// [`TransactionState::RolledBack`] and the store error is returned.
    pub fn commit(&mut self) -> CoreResult<()> {
        if !self.is_active() {
            return Err(CoreError::invalid_operation("no active transaction to commit"));
        }
        self.state = TransactionState::Committed;
        match self.store.current_transaction() {
            None => debug!("no datastore transaction open at commit"),
            Some(txn) => {
                if let Err(err) = self.store.commit(&txn) {
                    self.state = TransactionState::RolledBack;
                    if self.store.current_transaction() == Some(txn) {
                        if let Err(cleanup) = self.store.rollback(&txn) {
                            warn!(id = %txn, error = %cleanup, "rollback after failed commit also failed");
                        }
                    }
                    return Err(err.into());
                }
                debug!(id = %txn, "committed datastore transaction");
            }
        }
        Ok(())
    }

    /// Rolls back the logical transaction and any store transaction still open.
    pub fn rollback(&mut self) -> CoreResult<()> {
        if !self.is_active() {
            return Err(CoreError::invalid_operation("no active transaction to roll back"));
        }
        self.state = TransactionState::RolledBack;
        match self.store.current_transaction() {
            None => debug!("no datastore transaction open at rollback"),
            Some(txn) => {
                self.store.rollback(&txn)?;
                debug!(id = %txn, "rolled back datastore transaction");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransactionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBridge")
            .field("state", &self.state)
            .field("eager", &self.eager)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigroup_codec::StoreKey;
    use entigroup_storage::{
        Entity, EntityCursor, InMemoryDatastore, Query, StoreError, StoreResult, TransactionHandle,
    };

    /// Refuses every commit and rollback, leaving the transaction open.
    struct StuckStore(InMemoryDatastore);

    impl Datastore for StuckStore {
        fn put(&self, entity: &mut Entity) -> StoreResult<StoreKey> {
            self.0.put(entity)
        }

        fn get(&self, key: &StoreKey) -> StoreResult<Entity> {
            self.0.get(key)
        }

        fn delete(&self, key: &StoreKey) -> StoreResult<()> {
            self.0.delete(key)
        }

        fn query(&self, query: &Query) -> StoreResult<Box<dyn EntityCursor>> {
            self.0.query(query)
        }

        fn begin_transaction(&self) -> StoreResult<TransactionHandle> {
            self.0.begin_transaction()
        }

        fn commit(&self, _txn: &TransactionHandle) -> StoreResult<()> {
            Err(StoreError::backend("commit refused"))
        }

        fn rollback(&self, _txn: &TransactionHandle) -> StoreResult<()> {
            Err(StoreError::backend("rollback refused"))
        }

        fn current_transaction(&self) -> Option<TransactionHandle> {
            self.0.current_transaction()
        }
    }

    fn bridge(eager: bool) -> (Arc<InMemoryDatastore>, TransactionBridge) {
        let store = Arc::new(InMemoryDatastore::new());
        let bridge = TransactionBridge::new(store.clone(), eager);
        (store, bridge)
    }

    #[test]
    fn eager_begin_opens_store_transaction() {
        let (store, mut bridge) = bridge(true);
        bridge.begin().unwrap();
        assert!(store.current_transaction().is_some());
        bridge.commit().unwrap();
        assert!(store.current_transaction().is_none());
        assert_eq!(bridge.state(), TransactionState::Committed);
    }

    #[test]
    fn lazy_begin_defers_store_transaction() {
        let (store, mut bridge) = bridge(false);
        bridge.begin().unwrap();
        assert!(store.current_transaction().is_none());
        bridge.ensure_started().unwrap();
        assert!(store.current_transaction().is_some());
        bridge.rollback().unwrap();
        assert!(store.current_transaction().is_none());
    }

    #[test]
    fn commit_after_store_transaction_closed_is_a_no_op() {
        let (store, mut bridge) = bridge(true);
        bridge.begin().unwrap();
        let txn = store.current_transaction().unwrap();
        store.commit(&txn).unwrap();

        bridge.commit().unwrap();
        assert!(store.current_transaction().is_none());
    }

    #[test]
    fn double_begin_and_stray_commit_are_rejected() {
        let (_store, mut bridge) = bridge(true);
        assert!(bridge.commit().is_err());
        bridge.begin().unwrap();
        assert!(bridge.begin().is_err());
        bridge.rollback().unwrap();
        assert!(bridge.rollback().is_err());
        bridge.begin().unwrap();
        assert!(bridge.is_active());
    }

    #[test]
    fn failed_commit_leaves_nothing_open() {
        let (store, mut bridge) = bridge(true);
        let other = store.handle();
        let key = other.put(&mut Entity::new("Flight")).unwrap();

        bridge.begin().unwrap();
        let mut entity = store.get(&key).unwrap();
        entity.set_property("origin", "BOS");
        store.put(&mut entity).unwrap();
        other.put(&mut other.get(&key).unwrap()).unwrap();

        let err = bridge.commit().unwrap_err();
        assert!(matches!(err, CoreError::Store(_)));
        assert_eq!(bridge.state(), TransactionState::RolledBack);
        assert!(store.current_transaction().is_none());
    }

    #[test]
    fn failed_cleanup_keeps_the_commit_error() {
        let mut bridge = TransactionBridge::new(Arc::new(StuckStore(InMemoryDatastore::new())), true);
        bridge.begin().unwrap();

        let err = bridge.commit().unwrap_err();
        assert!(
            matches!(&err, CoreError::Store(StoreError::Backend(msg)) if msg.contains("commit")),
            "{err}"
        );
        assert_eq!(bridge.state(), TransactionState::RolledBack);
    }
}
