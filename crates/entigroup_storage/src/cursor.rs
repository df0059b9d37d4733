//! Result cursors.

use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};
use std::collections::VecDeque;

/// A cursor over query results.
///
/// Every method may fail: a real store fetches result batches lazily, so
/// errors can surface at any point during iteration rather than when the
/// query is issued.
pub trait EntityCursor: Send {
    /// Returns true if another entity is available.
    fn has_next(&mut self) -> StoreResult<bool>;

    /// Advances and returns the next entity, or `None` when exhausted.
    fn next_entity(&mut self) -> StoreResult<Option<Entity>>;

    /// Removes the entity most recently returned.
    fn remove(&mut self) -> StoreResult<()>;
}

/// A cursor over an already materialized result set.
#[derive(Debug, Default)]
pub struct VecCursor {
    entities: VecDeque<Entity>,
}

impl VecCursor {
    /// Creates a cursor over `entities`, in order.
    #[must_use]
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities: entities.into(),
        }
    }

    /// Returns the number of remaining entities.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.entities.len()
    }
}

impl EntityCursor for VecCursor {
    fn has_next(&mut self) -> StoreResult<bool> {
        Ok(!self.entities.is_empty())
    }

    fn next_entity(&mut self) -> StoreResult<Option<Entity>> {
        Ok(self.entities.pop_front())
    }

    fn remove(&mut self) -> StoreResult<()> {
        Err(StoreError::unsupported("remove on a query result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_cursor_drains_in_order() {
        let mut cursor = VecCursor::new(vec![Entity::new("A"), Entity::new("B")]);
        assert!(cursor.has_next().unwrap());
        assert_eq!(cursor.next_entity().unwrap().unwrap().kind(), "A");
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.next_entity().unwrap().unwrap().kind(), "B");
        assert!(!cursor.has_next().unwrap());
        assert!(cursor.next_entity().unwrap().is_none());
        assert!(cursor.remove().is_err());
    }
}
