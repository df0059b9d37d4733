//! Key registry for dependent inserts.
//!
//! While a cascade runs, an owner that has just been stored records which
//! of its still-transient children must be keyed under it. When each child
//! is inserted it takes its ancestor from here. Entries live in an arena
//! indexed by [`PendingInsertId`] and are scoped to one top-level persist.

use crate::error::{CoreError, CoreResult};
use crate::object::ObjectHandle;
use entigroup_codec::StoreKey;
use std::collections::HashMap;
use tracing::{trace, warn};

/// Index of a pending insert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingInsertId(usize);

/// A child that must be stored under its owner's key.
#[derive(Debug, Clone)]
pub struct PendingInsert {
    /// The owning object.
    pub owner: ObjectHandle,
    /// The owner's relation field holding the child.
    pub field: String,
    /// The child object.
    pub child: ObjectHandle,
    /// The key the child must use as its parent.
    pub ancestor: StoreKey,
    consumed: bool,
}

/// Arena of pending dependent inserts for one cascade.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    entries: Vec<PendingInsert>,
    by_child: HashMap<ObjectHandle, PendingInsertId>,
}

impl KeyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `child` must be keyed under `ancestor`.
    ///
    /// Registering the same child again under the same ancestor returns the
    /// existing record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if the child is already
    /// claimed by a different owner key.
    pub fn register(
        &mut self,
        owner: ObjectHandle,
        field: &str,
        child: ObjectHandle,
        ancestor: &StoreKey,
    ) -> CoreResult<PendingInsertId> {
        if let Some(&id) = self.by_child.get(&child) {
            let existing = &self.entries[id.0];
            if !existing.consumed && existing.ancestor != *ancestor {
                return Err(CoreError::illegal_argument(format!(
                    "{child} is claimed as a child of both {} and {ancestor}",
                    existing.ancestor
                )));
            }
            if !existing.consumed {
                return Ok(id);
            }
        }

        let id = PendingInsertId(self.entries.len());
        self.entries.push(PendingInsert {
            owner,
            field: field.to_string(),
            child,
            ancestor: ancestor.clone(),
            consumed: false,
        });
        self.by_child.insert(child, id);
        trace!(%owner, field, %child, %ancestor, "registered dependent insert");
        Ok(id)
    }

    /// Consumes the ancestor recorded for `child`, if any.
    ///
    /// Each record is handed out at most once.
    pub fn take_ancestor(&mut self, child: ObjectHandle) -> Option<StoreKey> {
        let id = *self.by_child.get(&child)?;
        let entry = self.entries.get_mut(id.0)?;
        if entry.consumed {
            return None;
        }
        entry.consumed = true;
        trace!(%child, ancestor = %entry.ancestor, "consumed dependent insert");
        Some(entry.ancestor.clone())
    }

    /// Returns a record by id.
    #[must_use]
    pub fn get(&self, id: PendingInsertId) -> Option<&PendingInsert> {
        self.entries.get(id.0)
    }

    /// Returns the number of records not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|e| !e.consumed).count()
    }

    /// Ends the registry's scope, logging records that were never consumed.
    ///
    /// A leftover record means the child was stored by some other path
    /// during the cascade, so it is not an error.
    pub fn close(self) {
        for entry in self.entries.iter().filter(|e| !e.consumed) {
            warn!(
                owner = %entry.owner,
                field = %entry.field,
                child = %entry.child,
                "dependent insert was never consumed"
            );
        }
    }
}
