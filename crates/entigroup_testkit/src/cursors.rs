//! Cursors, stores and observers for exercising failure translation.

use entigroup_codec::StoreKey;
use entigroup_core::FailureObserver;
use entigroup_storage::{
    Datastore, Entity, EntityCursor, InMemoryDatastore, Query, StoreError, StoreResult,
    TransactionHandle, VecCursor,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// A cursor whose `next_entity` fails on one chosen call.
///
/// Calls before that one pass through to the wrapped cursor. The failing
/// call does not advance the wrapped cursor.
pub struct FailingCursor {
    inner: Box<dyn EntityCursor>,
    calls: usize,
    fail_on: usize,
}

impl FailingCursor {
    /// Wraps `inner`, failing the `fail_on`-th call to `next_entity` (1-based).
    pub fn new(inner: Box<dyn EntityCursor>, fail_on: usize) -> Self {
        Self {
            inner,
            calls: 0,
            fail_on,
        }
    }

    /// A cursor yielding `count` fresh entities of `kind` before failing on
    /// the next call.
    pub fn after(kind: &str, count: usize) -> Self {
        let entities = (0..count).map(|_| Entity::new(kind)).collect();
        Self::new(Box::new(VecCursor::new(entities)), count + 1)
    }

    /// Returns how many times `next_entity` was called.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl EntityCursor for FailingCursor {
    fn has_next(&mut self) -> StoreResult<bool> {
        if self.calls + 1 == self.fail_on {
            return Ok(true);
        }
        self.inner.has_next()
    }

    fn next_entity(&mut self) -> StoreResult<Option<Entity>> {
        self.calls += 1;
        if self.calls == self.fail_on {
            debug!(call = self.calls, "failing cursor call");
            return Err(StoreError::backend("datastore timeout while fetching results"));
        }
        self.inner.next_entity()
    }

    fn remove(&mut self) -> StoreResult<()> {
        self.inner.remove()
    }
}

/// Counts the failures it is notified of.
#[derive(Debug, Default)]
pub struct CountingObserver {
    failures: AtomicUsize,
}

impl CountingObserver {
    /// Returns the number of failures observed.
    pub fn count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl FailureObserver for CountingObserver {
    fn on_failure(&self, _err: &StoreError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// An in-memory store whose query cursors fail on a chosen `next` call.
#[derive(Debug)]
pub struct FlakyDatastore {
    inner: InMemoryDatastore,
    fail_on: usize,
}

impl FlakyDatastore {
    /// Wraps a fresh in-memory store.
    pub fn new(fail_on: usize) -> Self {
        Self {
            inner: InMemoryDatastore::new(),
            fail_on,
        }
    }
}

impl Datastore for FlakyDatastore {
    fn put(&self, entity: &mut Entity) -> StoreResult<StoreKey> {
        self.inner.put(entity)
    }

    fn get(&self, key: &StoreKey) -> StoreResult<Entity> {
        self.inner.get(key)
    }

    fn delete(&self, key: &StoreKey) -> StoreResult<()> {
        self.inner.delete(key)
    }

    fn query(&self, query: &Query) -> StoreResult<Box<dyn EntityCursor>> {
        let cursor = self.inner.query(query)?;
        Ok(Box::new(FailingCursor::new(cursor, self.fail_on)))
    }

    fn begin_transaction(&self) -> StoreResult<TransactionHandle> {
        self.inner.begin_transaction()
    }

    fn commit(&self, handle: &TransactionHandle) -> StoreResult<()> {
        self.inner.commit(handle)
    }

    fn rollback(&self, handle: &TransactionHandle) -> StoreResult<()> {
        self.inner.rollback(handle)
    }

    fn current_transaction(&self) -> Option<TransactionHandle> {
        self.inner.current_transaction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_cursor_fails_once_on_the_chosen_call() {
        let mut cursor = FailingCursor::after("Flight", 2);
        assert!(cursor.next_entity().unwrap().is_some());
        assert!(cursor.next_entity().unwrap().is_some());
        assert!(cursor.has_next().unwrap());
        assert!(cursor.next_entity().is_err());
        assert!(cursor.next_entity().unwrap().is_none());
        assert_eq!(cursor.calls(), 4);
    }
}
