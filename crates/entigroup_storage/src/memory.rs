//! In-memory datastore.

use crate::cursor::{EntityCursor, VecCursor};
use crate::datastore::{Datastore, TransactionHandle};
use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use entigroup_codec::{KeyIdentity, StoreKey};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Committed state shared by every handle onto the same store.
#[derive(Debug, Default)]
struct Tables {
    entities: BTreeMap<StoreKey, Entity>,
    /// Commit counter per entity group root, for conflict detection.
    group_versions: HashMap<StoreKey, u64>,
    last_id: i64,
}

impl Tables {
    fn group_version(&self, root: &StoreKey) -> u64 {
        self.group_versions.get(root).copied().unwrap_or(0)
    }

    fn bump_group(&mut self, root: &StoreKey) {
        *self.group_versions.entry(root.clone()).or_insert(0) += 1;
    }

    fn allocate_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Debug)]
enum PendingWrite {
    Put(Entity),
    Delete,
}

#[derive(Debug)]
struct OpenTransaction {
    handle: TransactionHandle,
    /// Group root and the group version observed when first touched.
    group: Option<(StoreKey, u64)>,
    writes: BTreeMap<StoreKey, PendingWrite>,
}

impl OpenTransaction {
    fn new() -> Self {
        Self {
            handle: TransactionHandle::new(),
            group: None,
            writes: BTreeMap::new(),
        }
    }

    /// Binds the transaction to the key's entity group, or checks that it already is.
    fn enlist(&mut self, key: &StoreKey, tables: &Tables) -> StoreResult<()> {
        let root = key.root();
        match &self.group {
            None => {
                self.group = Some((root.clone(), tables.group_version(root)));
                Ok(())
            }
            Some((group, _)) if group == root => Ok(()),
            Some((group, _)) => Err(StoreError::CrossGroup {
                expected: group.clone(),
                actual: root.clone(),
            }),
        }
    }
}

/// An in-memory datastore.
///
/// Suitable for:
/// - Unit and integration tests
/// - Embedded use where durability is not needed
///
/// Each value is one *handle*. Handles created with [`InMemoryDatastore::handle`]
/// share committed data but each has its own current transaction, the way
/// separate clients of one store would.
///
/// # Example
///
/// ```rust
/// use entigroup_storage::{Datastore, Entity, InMemoryDatastore};
///
/// let store = InMemoryDatastore::new();
/// let mut entity = Entity::new("Flight");
/// entity.set_property("origin", "BOS");
/// let key = store.put(&mut entity).unwrap();
/// assert_eq!(store.get(&key).unwrap().property("origin"), entity.property("origin"));
/// ```
pub struct InMemoryDatastore {
    tables: Arc<RwLock<Tables>>,
    txn: Mutex<Option<OpenTransaction>>,
}

impl InMemoryDatastore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            txn: Mutex::new(None),
        }
    }

    /// Creates another handle onto the same committed data.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            txn: Mutex::new(None),
        }
    }

    /// Returns the number of committed entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.tables.read().entities.len()
    }

    /// Returns true if a committed entity exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &StoreKey) -> bool {
        self.tables.read().entities.contains_key(key)
    }
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryDatastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDatastore")
            .field("entity_count", &self.entity_count())
            .field("in_transaction", &self.txn.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Datastore for InMemoryDatastore {
    fn put(&self, entity: &mut Entity) -> StoreResult<StoreKey> {
        let mut txn = self.txn.lock();
        if !entity.is_complete() {
            let id = self.tables.write().allocate_id();
            entity.assign_identity(KeyIdentity::Id(id))?;
        }
        let key = entity
            .key()
            .ok_or_else(|| StoreError::unsupported("put of an entity without a valid key"))?;

        match txn.as_mut() {
            Some(open) => {
                open.enlist(&key, &self.tables.read())?;
                open.writes
                    .insert(key.clone(), PendingWrite::Put(entity.clone()));
            }
            None => {
                let mut tables = self.tables.write();
                tables.entities.insert(key.clone(), entity.clone());
                tables.bump_group(key.root());
            }
        }
        trace!(%key, "put entity");
        Ok(key)
    }

    fn get(&self, key: &StoreKey) -> StoreResult<Entity> {
        let mut txn = self.txn.lock();
        if let Some(open) = txn.as_mut() {
            open.enlist(key, &self.tables.read())?;
            // Own writes are visible inside the transaction
            match open.writes.get(key) {
                Some(PendingWrite::Put(entity)) => return Ok(entity.clone()),
                Some(PendingWrite::Delete) => {
                    return Err(StoreError::EntityNotFound { key: key.clone() })
                }
                None => {}
            }
        }
        self.tables
            .read()
            .entities
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::EntityNotFound { key: key.clone() })
    }

    fn delete(&self, key: &StoreKey) -> StoreResult<()> {
        let mut txn = self.txn.lock();
        match txn.as_mut() {
            Some(open) => {
                open.enlist(key, &self.tables.read())?;
                open.writes.insert(key.clone(), PendingWrite::Delete);
            }
            None => {
                let mut tables = self.tables.write();
                if tables.entities.remove(key).is_some() {
                    tables.bump_group(key.root());
                }
            }
        }
        trace!(%key, "deleted entity");
        Ok(())
    }

    fn query(&self, query: &Query) -> StoreResult<Box<dyn EntityCursor>> {
        let mut txn = self.txn.lock();
        let tables = self.tables.read();

        let mut results: BTreeMap<StoreKey, Entity> = tables
            .entities
            .iter()
            .filter(|(_, entity)| query.matches(entity))
            .map(|(key, entity)| (key.clone(), entity.clone()))
            .collect();

        if let Some(open) = txn.as_mut() {
            let ancestor = query.ancestor_key().ok_or_else(|| {
                StoreError::unsupported("non-ancestor query inside a transaction")
            })?;
            open.enlist(ancestor, &tables)?;
            for (key, write) in &open.writes {
                match write {
                    PendingWrite::Put(entity) if query.matches(entity) => {
                        results.insert(key.clone(), entity.clone());
                    }
                    PendingWrite::Put(_) | PendingWrite::Delete => {
                        results.remove(key);
                    }
                }
            }
        }

        let mut entities: Vec<Entity> = results.into_values().collect();
        if let Some(limit) = query.result_limit() {
            entities.truncate(limit);
        }
        trace!(kind = query.kind(), results = entities.len(), "ran query");
        Ok(Box::new(VecCursor::new(entities)))
    }

    fn begin_transaction(&self) -> StoreResult<TransactionHandle> {
        let mut txn = self.txn.lock();
        if txn.is_some() {
            return Err(StoreError::TransactionAlreadyActive);
        }
        let open = OpenTransaction::new();
        let handle = open.handle;
        *txn = Some(open);
        debug!(%handle, "began store transaction");
        Ok(handle)
    }

    fn commit(&self, handle: &TransactionHandle) -> StoreResult<()> {
        let mut txn = self.txn.lock();
        let open = match txn.take() {
            Some(open) if open.handle == *handle => open,
            other => {
                *txn = other;
                return Err(StoreError::TransactionNotActive {
                    id: handle.to_string(),
                });
            }
        };

        let mut tables = self.tables.write();
        if let Some((root, observed)) = &open.group {
            if tables.group_version(root) != *observed {
                debug!(%handle, group = %root, "commit lost a race on the entity group");
                return Err(StoreError::ConcurrentTransaction { group: root.clone() });
            }
            if !open.writes.is_empty() {
                for (key, write) in open.writes {
                    match write {
                        PendingWrite::Put(entity) => {
                            tables.entities.insert(key, entity);
                        }
                        PendingWrite::Delete => {
                            tables.entities.remove(&key);
                        }
                    }
                }
                tables.bump_group(root);
            }
        }
        debug!(%handle, "committed store transaction");
        Ok(())
    }

    fn rollback(&self, handle: &TransactionHandle) -> StoreResult<()> {
        let mut txn = self.txn.lock();
        match txn.take() {
            Some(open) if open.handle == *handle => {
                debug!(%handle, discarded = open.writes.len(), "rolled back store transaction");
                Ok(())
            }
            other => {
                *txn = other;
                Err(StoreError::TransactionNotActive {
                    id: handle.to_string(),
                })
            }
        }
    }

    fn current_transaction(&self) -> Option<TransactionHandle> {
        self.txn.lock().as_ref().map(|open| open.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_root(store: &InMemoryDatastore, kind: &str) -> StoreKey {
        store.put(&mut Entity::new(kind)).unwrap()
    }

    #[test]
    fn put_allocates_increasing_ids() {
        let store = InMemoryDatastore::new();
        let k1 = put_root(&store, "Flight");
        let k2 = put_root(&store, "Flight");
        assert!(k2.id().unwrap() > k1.id().unwrap());
        assert_eq!(store.entity_count(), 2);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = InMemoryDatastore::new();
        let key = StoreKey::with_id("Flight", 99).unwrap();
        assert!(matches!(
            store.get(&key),
            Err(StoreError::EntityNotFound { .. })
        ));
        assert!(store.get_opt(&key).unwrap().is_none());
    }

    #[test]
    fn transactional_writes_apply_on_commit() {
        let store = InMemoryDatastore::new();
        let txn = store.begin_transaction().unwrap();
        let key = put_root(&store, "Flight");

        // Visible to the transaction, not to the shared tables
        assert!(store.get(&key).is_ok());
        assert!(!store.contains(&key));

        store.commit(&txn).unwrap();
        assert!(store.contains(&key));
        assert!(store.current_transaction().is_none());
    }

    #[test]
    fn rollback_discards_writes() {
        let store = InMemoryDatastore::new();
        let txn = store.begin_transaction().unwrap();
        let key = put_root(&store, "Flight");
        store.rollback(&txn).unwrap();
        assert!(!store.contains(&key));
        assert!(store.current_transaction().is_none());
    }

    #[test]
    fn transaction_is_bound_to_one_group() {
        let store = InMemoryDatastore::new();
        let a = put_root(&store, "Parent");
        let b = put_root(&store, "Parent");

        let txn = store.begin_transaction().unwrap();
        store.get(&a).unwrap();
        let child = store.put(&mut Entity::with_parent("Child", a.clone()));
        assert!(child.is_ok());
        let err = store.get(&b).unwrap_err();
        assert!(matches!(err, StoreError::CrossGroup { .. }));
        store.rollback(&txn).unwrap();
    }

    #[test]
    fn conflicting_commit_is_rejected() {
        let store = InMemoryDatastore::new();
        let other = store.handle();
        let key = put_root(&store, "Parent");

        let txn = store.begin_transaction().unwrap();
        let mut entity = store.get(&key).unwrap();
        entity.set_property("n", 1i64);
        store.put(&mut entity).unwrap();

        // Another client commits to the same group first
        let mut theirs = other.get(&key).unwrap();
        theirs.set_property("n", 2i64);
        other.put(&mut theirs).unwrap();

        let err = store.commit(&txn).unwrap_err();
        assert!(matches!(err, StoreError::ConcurrentTransaction { .. }));
        assert!(err.is_retryable());
        assert!(store.current_transaction().is_none());
    }

    #[test]
    fn nested_begin_is_rejected() {
        let store = InMemoryDatastore::new();
        let txn = store.begin_transaction().unwrap();
        assert!(matches!(
            store.begin_transaction(),
            Err(StoreError::TransactionAlreadyActive)
        ));
        assert_eq!(store.current_transaction(), Some(txn));
    }

    #[test]
    fn ancestor_query_sees_descendants_and_limit() {
        let store = InMemoryDatastore::new();
        let parent = put_root(&store, "Parent");
        for _ in 0..3 {
            store
                .put(&mut Entity::with_parent("Child", parent.clone()))
                .unwrap();
        }
        put_root(&store, "Child");

        let mut cursor = store
            .query(&Query::new("Child").ancestor(parent.clone()))
            .unwrap();
        let mut count = 0;
        while let Some(entity) = cursor.next_entity().unwrap() {
            assert_eq!(entity.parent(), Some(&parent));
            count += 1;
        }
        assert_eq!(count, 3);

        let mut limited = store
            .query(&Query::new("Child").ancestor(parent).limit(2))
            .unwrap();
        assert!(limited.next_entity().unwrap().is_some());
        assert!(limited.next_entity().unwrap().is_some());
        assert!(limited.next_entity().unwrap().is_none());
    }

    #[test]
    fn query_in_transaction_overlays_pending_writes() {
        let store = InMemoryDatastore::new();
        let parent = put_root(&store, "Parent");
        let existing = store
            .put(&mut Entity::with_parent("Child", parent.clone()))
            .unwrap();

        let txn = store.begin_transaction().unwrap();
        store.delete(&existing).unwrap();
        let added = store
            .put(&mut Entity::with_parent("Child", parent.clone()))
            .unwrap();

        let mut cursor = store.query(&Query::new("Child").ancestor(parent)).unwrap();
        let only = cursor.next_entity().unwrap().unwrap();
        assert_eq!(only.key(), Some(added));
        assert!(cursor.next_entity().unwrap().is_none());

        assert!(store.query(&Query::new("Child")).is_err());
        store.rollback(&txn).unwrap();
    }
}
