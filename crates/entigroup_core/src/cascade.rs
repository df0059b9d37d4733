//! Cascading writes for one top-level persist or delete.
//!
//! A [`Cascade`] borrows the session for the duration of one
//! `make_persistent` or `delete_persistent` call. It validates the whole
//! reachable object graph before the first write, then stores objects
//! owner-first so that every dependent child can be keyed under its
//! owner's freshly assigned key.

use crate::error::{CoreError, CoreResult};
use crate::field_manager::{planned_parent, render_ancestor, render_primary_key, FieldManager};
use crate::mapping::MappingKind;
use crate::metadata::{ClassMeta, FieldKind, FieldMeta};
use crate::object::{FieldValue, Lifecycle, ObjectHandle, ObjectState, ScoList};
use crate::registry::KeyRegistry;
use crate::relation::RelationOutcome;
use crate::session::SessionCore;
use entigroup_codec::StoreKey;
use entigroup_storage::Entity;
use std::collections::HashSet;
use tracing::debug;

/// A reference write postponed until its target has a key.
#[derive(Debug)]
struct DeferredWrite {
    owner: ObjectHandle,
    field: String,
    column: String,
    target: ObjectHandle,
}

/// State of one cascading operation.
pub(crate) struct Cascade<'s> {
    core: &'s mut SessionCore,
    registry: KeyRegistry,
    in_flight: HashSet<ObjectHandle>,
    deleting: HashSet<ObjectHandle>,
    deferred: Vec<DeferredWrite>,
}

impl<'s> Cascade<'s> {
    pub(crate) fn new(core: &'s mut SessionCore) -> Self {
        Self {
            core,
            registry: KeyRegistry::new(),
            in_flight: HashSet::new(),
            deleting: HashSet::new(),
            deferred: Vec::new(),
        }
    }

    /// Inserts a transient object, or updates a persistent one, together
    /// with everything reachable through persist-cascading relations.
    pub(crate) fn persist(mut self, handle: ObjectHandle) -> CoreResult<StoreKey> {
        self.validate(handle)?;
        let key = match self.core.objects.get(handle)?.lifecycle {
            Lifecycle::Transient => self.insert(handle)?,
            Lifecycle::Persistent => self.update(handle)?,
            Lifecycle::Deleted => {
                return Err(CoreError::invalid_operation(format!(
                    "{handle} was deleted and cannot be persisted"
                )))
            }
        };
        self.finish()?;
        Ok(key)
    }

    /// Deletes a persistent object and its remove-cascading children.
    pub(crate) fn remove(mut self, handle: ObjectHandle) -> CoreResult<()> {
        self.delete(handle)?;
        self.finish()
    }

    fn finish(self) -> CoreResult<()> {
        let Self {
            core,
            registry,
            deferred,
            ..
        } = self;
        registry.close();
        if let Some(write) = deferred.first() {
            let class = core.objects.get(write.owner)?.class.name().to_string();
            return Err(CoreError::not_yet_flushed(class, &write.field));
        }
        Ok(())
    }

    /// Checks ancestor and cascade rules across the reachable graph.
    ///
    /// Runs before any write so a rejected persist leaves the store untouched.
    fn validate(&self, root: ObjectHandle) -> CoreResult<()> {
        let mut stack = vec![root];
        let mut visited = HashSet::new();

        while let Some(handle) = stack.pop() {
            if !visited.insert(handle) {
                continue;
            }
            let owner = self.core.objects.get(handle)?;
            let class = owner.class.clone();

            for field in class.fields() {
                let mapping = MappingKind::of(field);
                if !mapping.is_reference() || !owner.is_loaded(field.name()) {
                    continue;
                }
                for target in owner.field(field.name()).handles() {
                    let related = self.core.objects.get(target)?;
                    match mapping {
                        MappingKind::ParentReference => check_parent(&class, field, owner, related)?,
                        _ => check_child(&class, field, mapping, owner.key.as_ref(), related)?,
                    }
                    if related.lifecycle == Lifecycle::Transient {
                        stack.push(target);
                    }
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, handle: ObjectHandle) -> CoreResult<StoreKey> {
        let class = {
            let state = self.core.objects.get(handle)?;
            match state.lifecycle {
                Lifecycle::Persistent => return stored_key(state),
                Lifecycle::Deleted => {
                    return Err(CoreError::invalid_operation(format!(
                        "{handle} was deleted and cannot be persisted"
                    )))
                }
                Lifecycle::Transient => state.class.clone(),
            }
        };
        if !self.in_flight.insert(handle) {
            return Err(CoreError::invalid_operation(format!(
                "{} {handle} is already being inserted",
                class.name()
            )));
        }

        // Parents are stored before their children
        for field in parent_fields(&class) {
            let Some(parent) = self.core.objects.get(handle)?.field(field.name()).as_handle() else {
                continue;
            };
            let parent_state = self.core.objects.get(parent)?;
            if parent_state.lifecycle == Lifecycle::Transient && !self.in_flight.contains(&parent) {
                self.insert(parent)?;
            }
        }
        // Storing the parent may have stored this object as its dependent
        let state = self.core.objects.get(handle)?;
        if state.is_persistent() {
            self.in_flight.remove(&handle);
            return stored_key(state);
        }

        let inherited = self.registry.take_ancestor(handle);
        let mut manager = FieldManager::begin_insert(
            class.clone(),
            self.core.metadata.clone(),
            &self.core.config,
            state,
            inherited,
        )?;

        for field in class.fields() {
            let value = self.core.objects.get(handle)?.field(field.name());
            if MappingKind::of(field) == MappingKind::ParentReference {
                if let Some(parent) = value.as_handle() {
                    let parent_key = self.core.objects.get(parent)?.key.clone().ok_or_else(|| {
                        CoreError::not_yet_flushed(class.name(), field.name())
                    })?;
                    manager.recreate_entity_with_ancestor(parent_key)?;
                }
            }
            manager.store_field(field, &value)?;
        }

        let (mut entity, mut relations) = manager.into_parts();
        let key = self.core.store.put(&mut entity)?;
        debug!(class = class.name(), %key, "inserted entity");
        self.publish_insert(handle, &class, &key, &entity)?;

        if relations.store_relations(&mut entity, handle, self)? {
            self.core.store.put(&mut entity)?;
        }
        self.core.objects.get_mut(handle)?.entity = Some(entity);
        self.in_flight.remove(&handle);
        self.resolve_deferred(handle)?;
        Ok(key)
    }

    /// Publishes the assigned key back onto the object.
    fn publish_insert(
        &mut self,
        handle: ObjectHandle,
        class: &ClassMeta,
        key: &StoreKey,
        entity: &Entity,
    ) -> CoreResult<()> {
        let version = class
            .version_property(&self.core.config.version_property)
            .and_then(|column| entity.property(column))
            .and_then(|value| value.as_integer());

        let state = self.core.objects.get_mut(handle)?;
        state.key = Some(key.clone());
        state.version = version;
        state.lifecycle = Lifecycle::Persistent;

        for field in class.fields() {
            match field.kind() {
                FieldKind::PrimaryKey(kind) => {
                    state.set_field(field.name(), render_primary_key(*kind, key)?);
                }
                FieldKind::Ancestor(kind) => {
                    state.set_field(field.name(), render_ancestor(*kind, key.parent())?);
                }
                FieldKind::Version => state.set_field(field.name(), version.into()),
                FieldKind::Scalar(_) | FieldKind::Embedded(_) => {
                    state.loaded.insert(field.name().to_string());
                }
                FieldKind::Serialized | FieldKind::Relation(_) => {}
            }
        }
        self.core.identity_map.insert(key.clone(), handle);
        Ok(())
    }

    fn update(&mut self, handle: ObjectHandle) -> CoreResult<StoreKey> {
        let (class, key, expected) = {
            let state = self.core.objects.get(handle)?;
            (state.class.clone(), stored_key(state)?, state.version)
        };
        self.in_flight.insert(handle);

        let current = self.core.store.get(&key)?;
        let mut manager = FieldManager::begin_update(
            class.clone(),
            self.core.metadata.clone(),
            &self.core.config,
            current,
            expected,
        )?;

        for field in class.fields() {
            let state = self.core.objects.get(handle)?;
            // Relations never loaded are left as stored
            if MappingKind::of(field).is_deferred() && !state.is_loaded(field.name()) {
                continue;
            }
            manager.store_field(field, &state.field(field.name()))?;
        }
        let version = manager.increment_version();

        let (mut entity, mut relations) = manager.into_parts();
        self.core.store.put(&mut entity)?;
        debug!(class = class.name(), %key, ?version, "updated entity");
        {
            let state = self.core.objects.get_mut(handle)?;
            state.version = version;
            if let Some(field) = class.version_field() {
                state.set_field(field.name(), version.into());
            }
        }

        if relations.store_relations(&mut entity, handle, self)? {
            self.core.store.put(&mut entity)?;
        }
        self.core.objects.get_mut(handle)?.entity = Some(entity);
        self.in_flight.remove(&handle);
        self.resolve_deferred(handle)?;
        Ok(key)
    }

    fn delete(&mut self, handle: ObjectHandle) -> CoreResult<()> {
        if !self.deleting.insert(handle) {
            return Ok(());
        }
        let (class, key) = {
            let state = self.core.objects.get(handle)?;
            match state.lifecycle {
                Lifecycle::Persistent => (state.class.clone(), stored_key(state)?),
                Lifecycle::Deleted => return Ok(()),
                Lifecycle::Transient => {
                    return Err(CoreError::invalid_operation(format!(
                        "{} {handle} was never stored",
                        state.class.name()
                    )))
                }
            }
        };

        for field in class.fields() {
            if !MappingKind::of(field).owns_children() || !field.cascade().includes_remove() {
                continue;
            }
            if !self.core.objects.get(handle)?.is_loaded(field.name()) {
                self.core.load_relation(handle, field)?;
            }
            let children = self.core.objects.get(handle)?.field(field.name()).handles();
            for child in children {
                if self.core.objects.get(child)?.is_persistent() {
                    self.delete(child)?;
                }
            }
        }

        self.core.store.delete(&key)?;
        self.core.objects.get_mut(handle)?.lifecycle = Lifecycle::Deleted;
        self.core.identity_map.remove(&key);
        debug!(class = class.name(), %key, "deleted entity");
        Ok(())
    }

    /// Records the owner's transient children as needing the owner's key
    /// as their ancestor.
    pub(crate) fn register_key(&mut self, owner: ObjectHandle, owner_key: &StoreKey) -> CoreResult<()> {
        let state = self.core.objects.get(owner)?;
        let mut pending = Vec::new();
        for field in state.class.fields() {
            if !MappingKind::of(field).owns_children() {
                continue;
            }
            for child in state.field(field.name()).handles() {
                let transient = self.core.objects.get(child)?.lifecycle == Lifecycle::Transient;
                if transient && !self.in_flight.contains(&child) {
                    pending.push((field.name().to_string(), child));
                }
            }
        }
        for (field, child) in pending {
            self.registry.register(owner, &field, child, owner_key)?;
        }
        Ok(())
    }

    /// Resolves the key a reference field of `owner` should hold.
    pub(crate) fn resolve_child_key(
        &mut self,
        owner: ObjectHandle,
        owner_key: &StoreKey,
        field: &FieldMeta,
        child: ObjectHandle,
    ) -> RelationOutcome {
        let state = match self.core.objects.get(child) {
            Ok(state) => state,
            Err(err) => return RelationOutcome::Fatal(err),
        };
        match state.lifecycle {
            Lifecycle::Persistent => match &state.key {
                Some(key) if key.parent().map_or(true, |p| p == owner_key) => {
                    RelationOutcome::Ready(key.clone())
                }
                Some(key) => RelationOutcome::Fatal(CoreError::illegal_argument(format!(
                    "{key} cannot be referenced by {}.{} of {owner_key}",
                    owner_key.kind(),
                    field.name()
                ))),
                None => RelationOutcome::Deferred,
            },
            Lifecycle::Deleted => RelationOutcome::Fatal(CoreError::illegal_argument(format!(
                "{}.{} refers to a deleted object",
                owner_key.kind(),
                field.name()
            ))),
            Lifecycle::Transient if self.in_flight.contains(&child) => RelationOutcome::Deferred,
            Lifecycle::Transient if !field.cascade().includes_persist() => {
                RelationOutcome::Fatal(CoreError::illegal_argument(format!(
                    "{}.{} does not cascade persist to transient {child}",
                    owner_key.kind(),
                    field.name()
                )))
            }
            Lifecycle::Transient => {
                debug!(%owner, field = field.name(), %child, "cascading insert to child");
                match self.insert(child) {
                    Ok(key) => RelationOutcome::Ready(key),
                    Err(err) => RelationOutcome::Fatal(err),
                }
            }
        }
    }

    /// Postpones writing `child`'s key into `owner` until `child` is stored.
    pub(crate) fn defer_write(&mut self, owner: ObjectHandle, field: &FieldMeta, child: ObjectHandle) {
        debug!(%owner, field = field.name(), %child, "deferring relation write until target is stored");
        self.deferred.push(DeferredWrite {
            owner,
            field: field.name().to_string(),
            column: field.column_name().to_string(),
            target: child,
        });
    }

    /// Stores new collection elements under the owner and deletes removed
    /// ones when the relation cascades removal.
    pub(crate) fn sync_collection(
        &mut self,
        owner: ObjectHandle,
        owner_key: &StoreKey,
        field: &FieldMeta,
        value: FieldValue,
    ) -> CoreResult<FieldValue> {
        let (items, removed) = match value {
            FieldValue::Null => (Vec::new(), Vec::new()),
            FieldValue::Refs(items) => (items, Vec::new()),
            FieldValue::Tracked(list) => (list.items().to_vec(), list.removed().to_vec()),
            other => {
                return Err(CoreError::illegal_argument(format!(
                    "{} holds a collection, got {other:?}",
                    field.name()
                )))
            }
        };

        for &child in &items {
            match self.resolve_child_key(owner, owner_key, field, child) {
                RelationOutcome::Ready(key) if key.parent() == Some(owner_key) => {}
                RelationOutcome::Ready(key) => {
                    return Err(CoreError::illegal_argument(format!(
                        "{key} is not a child of {owner_key} and cannot join {}",
                        field.name()
                    )));
                }
                RelationOutcome::Deferred => {}
                RelationOutcome::Fatal(err) => return Err(err),
            }
        }

        for child in removed {
            if !self.core.objects.get(child)?.is_persistent() {
                continue;
            }
            if field.cascade().includes_remove() {
                self.delete(child)?;
            } else {
                debug!(%owner, field = field.name(), %child, "removed element left in place");
            }
        }
        Ok(FieldValue::Tracked(ScoList::new(items)))
    }

    /// Checks that a parent reference agrees with the owner's key.
    pub(crate) fn verify_parent(
        &self,
        owner_key: &StoreKey,
        field: &FieldMeta,
        value: &FieldValue,
    ) -> CoreResult<()> {
        let Some(parent) = value.as_handle() else {
            return Ok(());
        };
        let parent_key = self.core.objects.get(parent)?.key.as_ref();
        if parent_key.is_none() || parent_key != owner_key.parent() {
            return Err(CoreError::illegal_argument(format!(
                "{}.{} must refer to the parent of {owner_key}",
                owner_key.kind(),
                field.name()
            )));
        }
        Ok(())
    }

    /// Records a relation field value produced while applying events.
    pub(crate) fn mark_loaded(
        &mut self,
        owner: ObjectHandle,
        field: &FieldMeta,
        value: FieldValue,
    ) -> CoreResult<()> {
        self.core
            .objects
            .get_mut(owner)?
            .set_field(field.name(), value);
        Ok(())
    }

    /// Applies deferred writes that were waiting for `target`.
    fn resolve_deferred(&mut self, target: ObjectHandle) -> CoreResult<()> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|write| write.target == target);
        self.deferred = waiting;

        for write in ready {
            let target_key = stored_key(self.core.objects.get(target)?)?;
            let owner_key = stored_key(self.core.objects.get(write.owner)?)?;

            let mut entity = self.core.store.get(&owner_key)?;
            entity.set_property(write.column.clone(), target_key.clone());
            self.core.store.put(&mut entity)?;
            debug!(owner = %owner_key, field = %write.field, target = %target_key, "applied deferred relation write");

            let owner = self.core.objects.get_mut(write.owner)?;
            owner.set_field(&write.field, FieldValue::Ref(target));
            owner.entity = Some(entity);
        }
        Ok(())
    }
}

fn stored_key(state: &ObjectState) -> CoreResult<StoreKey> {
    state.key.clone().ok_or_else(|| {
        CoreError::invalid_operation(format!("{} has not been stored", state.class.name()))
    })
}

fn parent_fields(class: &ClassMeta) -> impl Iterator<Item = &FieldMeta> {
    class
        .fields()
        .iter()
        .filter(|f| MappingKind::of(f) == MappingKind::ParentReference)
}

fn check_child(
    class: &ClassMeta,
    field: &FieldMeta,
    mapping: MappingKind,
    owner_key: Option<&StoreKey>,
    child: &ObjectState,
) -> CoreResult<()> {
    let child_class = child.class.name();
    match child.lifecycle {
        Lifecycle::Deleted => Err(CoreError::illegal_argument(format!(
            "{}.{} refers to a deleted {child_class}",
            class.name(),
            field.name()
        ))),
        Lifecycle::Transient => {
            if !field.cascade().includes_persist() {
                return Err(CoreError::illegal_argument(format!(
                    "{}.{} refers to a transient {child_class} but does not cascade persist",
                    class.name(),
                    field.name()
                )));
            }
            match owner_key {
                Some(owner) => planned_parent(&child.class, child, Some(owner.clone())).map(drop),
                // The owner's key does not exist yet, so no child may name a parent
                None => match planned_parent(&child.class, child, None)? {
                    None => Ok(()),
                    Some(declared) => Err(CoreError::illegal_argument(format!(
                        "{child_class} declares ancestor {declared} but is a child of {}.{}",
                        class.name(),
                        field.name()
                    ))),
                },
            }
        }
        Lifecycle::Persistent => {
            let key = stored_key(child)?;
            let under_owner = owner_key.is_some() && key.parent() == owner_key;
            let root_reference = mapping == MappingKind::ChildReference && key.is_root();
            if under_owner || root_reference {
                Ok(())
            } else {
                Err(CoreError::illegal_argument(format!(
                    "{key} is not a child of {}.{}'s owner",
                    class.name(),
                    field.name()
                )))
            }
        }
    }
}

fn check_parent(
    class: &ClassMeta,
    field: &FieldMeta,
    owner: &ObjectState,
    parent: &ObjectState,
) -> CoreResult<()> {
    match parent.lifecycle {
        Lifecycle::Deleted => Err(CoreError::illegal_argument(format!(
            "{}.{} refers to a deleted parent",
            class.name(),
            field.name()
        ))),
        Lifecycle::Transient => {
            if !field.cascade().includes_persist() {
                return Err(CoreError::illegal_argument(format!(
                    "{}.{} refers to a transient parent but does not cascade persist",
                    class.name(),
                    field.name()
                )));
            }
            if owner.is_persistent() {
                return Err(CoreError::illegal_argument(format!(
                    "stored {} cannot be moved under a new parent",
                    class.name()
                )));
            }
            Ok(())
        }
        Lifecycle::Persistent => {
            let parent_key = stored_key(parent)?;
            let actual = match &owner.key {
                Some(key) => key.parent().cloned(),
                None => planned_parent(class, owner, None)?,
            };
            match actual {
                Some(actual) if actual != parent_key => Err(CoreError::illegal_argument(format!(
                    "{}.{} refers to {parent_key} but the ancestor is {actual}",
                    class.name(),
                    field.name()
                ))),
                Some(_) => Ok(()),
                None if owner.is_persistent() => Err(CoreError::illegal_argument(format!(
                    "stored root {} cannot be moved under {parent_key}",
                    class.name()
                ))),
                None => Ok(()),
            }
        }
    }
}

impl std::fmt::Debug for Cascade<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cascade")
            .field("in_flight", &self.in_flight)
            .field("pending_inserts", &self.registry.pending())
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}
