//! Mapping sessions.

use crate::cascade::Cascade;
use crate::config::MappingConfig;
use crate::error::{CoreError, CoreResult};
use crate::field_manager::FieldManager;
use crate::mapping::MappingKind;
use crate::metadata::{ClassMeta, FieldKind, FieldMeta, MetadataRegistry};
use crate::object::{FieldValue, Lifecycle, ObjectArena, ObjectHandle, ObjectState, ScoList};
use crate::relation::RelationFieldManager;
use crate::transaction::{TransactionBridge, TransactionState};
use crate::translate::{ExceptionTranslatingIterator, FailureObserver, NoopObserver, TranslatedError};
use entigroup_codec::{decode_key, StoreKey};
use entigroup_storage::{Datastore, Entity, Query};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// How [`Session::find`] identifies the object to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdLookup {
    /// A complete key.
    Key(StoreKey),
    /// A numeric id of a root entity.
    Id(i64),
    /// A key name of a root entity.
    Name(String),
}

impl From<StoreKey> for IdLookup {
    fn from(key: StoreKey) -> Self {
        Self::Key(key)
    }
}

impl From<i64> for IdLookup {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for IdLookup {
    /// An encoded key string is decoded; anything else is a key name.
    fn from(value: &str) -> Self {
        match decode_key(value) {
            Ok(key) => Self::Key(key),
            Err(_) => Self::Name(value.to_string()),
        }
    }
}

impl From<String> for IdLookup {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// Session state shared with the cascade and relation machinery.
pub(crate) struct SessionCore {
    pub(crate) store: Arc<dyn Datastore>,
    pub(crate) metadata: Arc<MetadataRegistry>,
    pub(crate) config: MappingConfig,
    pub(crate) objects: ObjectArena,
    /// One handle per stored key.
    pub(crate) identity_map: HashMap<StoreKey, ObjectHandle>,
    observer: Arc<dyn FailureObserver>,
}

impl SessionCore {
    /// Puts store failures in the caller's API vocabulary.
    fn translate(&self, err: CoreError) -> CoreError {
        match err {
            CoreError::Store(cause) => TranslatedError::new(self.config.api, cause).into(),
            other => other,
        }
    }

    /// Runs a query through a guarded cursor.
    pub(crate) fn query(&self, query: &Query) -> CoreResult<ExceptionTranslatingIterator> {
        let cursor = self.store.query(query)?;
        Ok(ExceptionTranslatingIterator::new(
            cursor,
            self.config.api,
            self.observer.clone(),
        ))
    }

    /// Runs an ancestor query, leaving out the owner itself.
    pub(crate) fn children(&self, query: &Query, owner_key: &StoreKey) -> CoreResult<Vec<Entity>> {
        let mut found = Vec::new();
        for entity in self.query(query)? {
            let entity = entity?;
            if entity.key().as_ref() != Some(owner_key) {
                found.push(entity);
            }
        }
        Ok(found)
    }

    /// Returns the target class of a relation field.
    pub(crate) fn target_class(&self, field: &FieldMeta) -> CoreResult<Arc<ClassMeta>> {
        let relation = field.relation_meta().ok_or_else(|| {
            CoreError::invalid_operation(format!("{} is not a relation field", field.name()))
        })?;
        self.metadata.class(relation.target())
    }

    /// Returns the handle for a stored entity, creating it on first sight.
    ///
    /// Scalar, embedded and serialized fields are read at once. Relation
    /// fields stay unloaded until first accessed.
    pub(crate) fn materialize(&mut self, entity: Entity) -> CoreResult<ObjectHandle> {
        let key = entity
            .key()
            .ok_or_else(|| CoreError::invalid_operation("cannot materialize an unstored entity"))?;
        if let Some(&handle) = self.identity_map.get(&key) {
            return Ok(handle);
        }

        let class = self.metadata.class_for_kind(entity.kind())?;
        let manager = FieldManager::begin_fetch(
            class.clone(),
            self.metadata.clone(),
            &self.config,
            entity,
        );
        let mut state = ObjectState::new(class.clone());
        for field in class.fields() {
            let value = match MappingKind::of(field) {
                MappingKind::Serialized => {
                    RelationFieldManager::fetch_relation_field(manager.entity(), field, self)?
                }
                mapping if mapping.is_reference() => continue,
                _ => manager.fetch_field(field)?,
            };
            state.set_field(field.name(), value);
        }
        state.version = manager.version();
        state.key = Some(key.clone());
        state.lifecycle = Lifecycle::Persistent;
        let (entity, _) = manager.into_parts();
        state.entity = Some(entity);

        let handle = self.objects.insert(state);
        self.identity_map.insert(key.clone(), handle);
        trace!(class = class.name(), %key, %handle, "materialized entity");
        Ok(handle)
    }

    /// Returns the handle for a key, reading the entity if needed.
    pub(crate) fn materialize_key(&mut self, key: &StoreKey) -> CoreResult<ObjectHandle> {
        if let Some(&handle) = self.identity_map.get(key) {
            return Ok(handle);
        }
        let entity = self.store.get(key)?;
        self.materialize(entity)
    }

    /// Resolves an unloaded relation field from the object's stored entity.
    pub(crate) fn load_relation(&mut self, handle: ObjectHandle, field: &FieldMeta) -> CoreResult<()> {
        let entity = self.objects.get(handle)?.entity.clone().ok_or_else(|| {
            CoreError::invalid_operation(format!("{handle} has no stored entity"))
        })?;
        let value = RelationFieldManager::fetch_relation_field(&entity, field, self)?;
        self.objects.get_mut(handle)?.set_field(field.name(), value);
        Ok(())
    }
}

/// A unit of work over a datastore.
///
/// A session owns the objects it creates or loads and hands out
/// [`ObjectHandle`]s to them. Each stored key maps to exactly one handle
/// per session. Store failures surface as [`CoreError::Translated`].
///
/// # Example
///
/// ```rust
/// use entigroup_core::{ClassMeta, FieldMeta, MappingConfig, MetadataRegistry, PrimaryKeyKind, ScalarType, Session};
/// use entigroup_storage::InMemoryDatastore;
/// use std::sync::Arc;
///
/// let metadata = MetadataRegistry::new()
///     .with(
///         ClassMeta::new("Flight")
///             .field(FieldMeta::primary_key("id", PrimaryKeyKind::EncodedString))
///             .field(FieldMeta::scalar("origin", ScalarType::Text)),
///     )
///     .unwrap();
/// let mut session = Session::new(Arc::new(InMemoryDatastore::new()), metadata, MappingConfig::default()).unwrap();
///
/// let flight = session.new_object("Flight").unwrap();
/// session.set(flight, "origin", "BOS").unwrap();
/// session.begin().unwrap();
/// let key = session.make_persistent(flight).unwrap();
/// session.commit().unwrap();
/// assert_eq!(key.kind(), "Flight");
/// ```
pub struct Session {
    core: SessionCore,
    transaction: TransactionBridge,
}

impl Session {
    /// Creates a session over `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a relation or
    /// embedded field names an unregistered class.
    pub fn new(
        store: Arc<dyn Datastore>,
        metadata: impl Into<Arc<MetadataRegistry>>,
        config: MappingConfig,
    ) -> CoreResult<Self> {
        config.validate()?;
        let metadata = metadata.into();
        metadata.validate_references()?;

        let transaction = TransactionBridge::new(store.clone(), config.eager_transactions);
        debug!(classes = metadata.len(), api = ?config.api, "opened mapping session");
        Ok(Self {
            core: SessionCore {
                store,
                metadata,
                config,
                objects: ObjectArena::default(),
                identity_map: HashMap::new(),
                observer: Arc::new(NoopObserver),
            },
            transaction,
        })
    }

    /// Sets the observer notified of failures during query iteration.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn FailureObserver>) -> Self {
        self.core.observer = observer;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &MappingConfig {
        &self.core.config
    }

    /// Returns the class metadata.
    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataRegistry> {
        &self.core.metadata
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.core.store
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins a transaction.
    pub fn begin(&mut self) -> CoreResult<()> {
        self.transaction.begin().map_err(|e| self.core.translate(e))
    }

    /// Commits the active transaction.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.transaction.commit().map_err(|e| self.core.translate(e))
    }

    /// Rolls back the active transaction.
    ///
    /// Objects stored during the transaction keep their handles, but later
    /// lookups read the store again.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.transaction
            .rollback()
            .map_err(|e| self.core.translate(e))?;
        self.core.identity_map.clear();
        Ok(())
    }

    /// Returns the transaction state.
    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        self.transaction.state()
    }

    /// Returns true while a transaction is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.transaction.is_active()
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Creates a transient object of a registered class.
    pub fn new_object(&mut self, class: &str) -> CoreResult<ObjectHandle> {
        let class = self.core.metadata.class(class)?;
        if class.is_embeddable() {
            return Err(CoreError::invalid_operation(format!(
                "{} is embeddable and has no identity of its own",
                class.name()
            )));
        }
        Ok(self.core.objects.insert(ObjectState::new(class)))
    }

    /// Sets a field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for version fields, for key
    /// fields of a stored object, and for deleted objects.
    pub fn set(
        &mut self,
        handle: ObjectHandle,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> CoreResult<()> {
        let state = self.core.objects.get_mut(handle)?;
        let class = state.class.clone();
        let meta = class.require_field(field)?;

        if state.lifecycle == Lifecycle::Deleted {
            return Err(CoreError::invalid_operation(format!("{handle} has been deleted")));
        }
        match meta.kind() {
            FieldKind::Version => {
                return Err(CoreError::invalid_operation(format!(
                    "{}.{field} is maintained by the session",
                    class.name()
                )))
            }
            FieldKind::PrimaryKey(_) | FieldKind::Ancestor(_) if state.is_persistent() => {
                return Err(CoreError::invalid_operation(format!(
                    "{}.{field} cannot change once stored",
                    class.name()
                )))
            }
            _ => {}
        }
        state.set_field(field, value.into());
        Ok(())
    }

    /// Reads a field, loading an unloaded relation from the store.
    pub fn get(&mut self, handle: ObjectHandle, field: &str) -> CoreResult<FieldValue> {
        self.ensure_loaded(handle, field)
            .map_err(|e| self.core.translate(e))?;
        Ok(self.core.objects.get(handle)?.field(field))
    }

    /// Appends to a one-to-many collection.
    pub fn add_to_collection(
        &mut self,
        handle: ObjectHandle,
        field: &str,
        child: ObjectHandle,
    ) -> CoreResult<()> {
        self.update_collection(handle, field, |list| {
            list.push(child);
            true
        })
        .map(|_| ())
    }

    /// Removes from a one-to-many collection. Returns false if `child` was
    /// not an element.
    ///
    /// The removed child is deleted on the next persist only if the
    /// relation cascades removal.
    pub fn remove_from_collection(
        &mut self,
        handle: ObjectHandle,
        field: &str,
        child: ObjectHandle,
    ) -> CoreResult<bool> {
        self.update_collection(handle, field, |list| list.remove(child))
    }

    fn update_collection(
        &mut self,
        handle: ObjectHandle,
        field: &str,
        change: impl FnOnce(&mut ScoList) -> bool,
    ) -> CoreResult<bool> {
        let class = self.core.objects.get(handle)?.class.clone();
        if MappingKind::of(class.require_field(field)?) != MappingKind::ChildCollection {
            return Err(CoreError::invalid_operation(format!(
                "{}.{field} is not a one-to-many collection",
                class.name()
            )));
        }
        self.ensure_loaded(handle, field)
            .map_err(|e| self.core.translate(e))?;

        let state = self.core.objects.get_mut(handle)?;
        let mut list = match state.field(field) {
            FieldValue::Tracked(list) => list,
            FieldValue::Refs(items) => ScoList::new(items),
            FieldValue::Null => ScoList::default(),
            other => {
                return Err(CoreError::illegal_argument(format!(
                    "{}.{field} holds {other:?}, not a collection",
                    class.name()
                )))
            }
        };
        let changed = change(&mut list);
        state.set_field(field, FieldValue::Tracked(list));
        Ok(changed)
    }

    fn ensure_loaded(&mut self, handle: ObjectHandle, field: &str) -> CoreResult<()> {
        let state = self.core.objects.get(handle)?;
        let class = state.class.clone();
        let meta = class.require_field(field)?;
        if state.is_persistent()
            && MappingKind::of(meta).is_reference()
            && !state.is_loaded(field)
        {
            self.transaction.ensure_started()?;
            self.core.load_relation(handle, meta)?;
        }
        Ok(())
    }

    /// Returns the key of a stored object.
    pub fn key(&self, handle: ObjectHandle) -> CoreResult<Option<StoreKey>> {
        Ok(self.core.objects.get(handle)?.key.clone())
    }

    /// Returns the last-known version of a versioned object.
    pub fn version(&self, handle: ObjectHandle) -> CoreResult<Option<i64>> {
        Ok(self.core.objects.get(handle)?.version)
    }

    /// Returns the lifecycle state of an object.
    pub fn lifecycle(&self, handle: ObjectHandle) -> CoreResult<Lifecycle> {
        Ok(self.core.objects.get(handle)?.lifecycle)
    }

    /// Returns the full state of an object.
    pub fn state(&self, handle: ObjectHandle) -> CoreResult<&ObjectState> {
        self.core.objects.get(handle)
    }

    /// Returns how many objects the session holds.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.core.objects.len()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Stores an object and everything reachable through relations that
    /// cascade persist.
    ///
    /// A transient object is inserted. Its dependent children are keyed
    /// under its key, so they land in its entity group. A stored object is
    /// updated, with the version check applied to versioned classes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] before anything is written if
    /// the object graph breaks an ancestor or cascade rule, and
    /// [`CoreError::ConcurrentModification`] if a versioned object changed
    /// in the store since it was read.
    pub fn make_persistent(&mut self, handle: ObjectHandle) -> CoreResult<StoreKey> {
        self.prepare_write()
            .and_then(|()| Cascade::new(&mut self.core).persist(handle))
            .map_err(|e| self.core.translate(e))
    }

    /// Deletes a stored object and its children on relations that cascade
    /// removal.
    pub fn delete_persistent(&mut self, handle: ObjectHandle) -> CoreResult<()> {
        self.prepare_write()
            .and_then(|()| Cascade::new(&mut self.core).remove(handle))
            .map_err(|e| self.core.translate(e))
    }

    fn prepare_write(&mut self) -> CoreResult<()> {
        if !self.core.config.allow_nontransactional_writes && !self.transaction.is_active() {
            return Err(CoreError::invalid_operation(
                "writes require an active transaction",
            ));
        }
        self.transaction.ensure_started()
    }

    /// Loads an object by key, id or name.
    ///
    /// Returns `Ok(None)` if nothing is stored under the key or the id is
    /// not positive.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if a key of another kind is
    /// given.
    pub fn find(
        &mut self,
        class: &str,
        id: impl Into<IdLookup>,
    ) -> CoreResult<Option<ObjectHandle>> {
        let class = self.core.metadata.class(class)?;
        let key = match id.into() {
            IdLookup::Key(key) if key.kind() != class.kind() => {
                return Err(CoreError::illegal_argument(format!(
                    "{key} is not a key of {}",
                    class.name()
                )))
            }
            IdLookup::Key(key) => key,
            IdLookup::Id(id) if id <= 0 => return Ok(None),
            IdLookup::Id(id) => StoreKey::with_id(class.kind(), id)?,
            IdLookup::Name(name) => StoreKey::with_name(class.kind(), name)?,
        };
        if let Some(&handle) = self.core.identity_map.get(&key) {
            return Ok(Some(handle));
        }

        self.load(&key).map_err(|e| self.core.translate(e))
    }

    fn load(&mut self, key: &StoreKey) -> CoreResult<Option<ObjectHandle>> {
        self.transaction.ensure_started()?;
        match self.core.store.get_opt(key)? {
            Some(entity) => self.core.materialize(entity).map(Some),
            None => Ok(None),
        }
    }

    /// Runs a query, returning the raw entities through a guarded cursor.
    pub fn query(&mut self, query: &Query) -> CoreResult<ExceptionTranslatingIterator> {
        self.transaction
            .ensure_started()
            .and_then(|()| self.core.query(query))
            .map_err(|e| self.core.translate(e))
    }

    /// Runs a query and materializes every result.
    pub fn query_objects(&mut self, query: &Query) -> CoreResult<Vec<ObjectHandle>> {
        let mut handles = Vec::new();
        for entity in self.query(query)? {
            let handle = self
                .core
                .materialize(entity?)
                .map_err(|e| self.core.translate(e))?;
            handles.push(handle);
        }
        Ok(handles)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("objects", &self.core.objects.len())
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}
