//! Mapped objects and the session's object arena.

use crate::error::{CoreError, CoreResult};
use crate::metadata::ClassMeta;
use entigroup_codec::{PropertyValue, StoreKey};
use entigroup_storage::Entity;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Handle to an object in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(usize);

impl ObjectHandle {
    /// Returns the arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Lifecycle state of a mapped object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Never stored.
    Transient,
    /// Stored, or materialized from the store.
    Persistent,
    /// Deleted through this session.
    Deleted,
}

/// Value of an embedded object: its own fields, no key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddedObject {
    fields: BTreeMap<String, FieldValue>,
}

impl EmbeddedObject {
    /// Creates an embedded object with no fields set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Sets a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Gets a field; unset fields are `None`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// A second-class-object list: a relation container whose in-place
/// mutations are tracked so the next update can apply them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoList {
    items: Vec<ObjectHandle>,
    removed: Vec<ObjectHandle>,
    dirty: bool,
}

impl ScoList {
    /// Wraps a loaded list. The result is clean.
    #[must_use]
    pub fn new(items: Vec<ObjectHandle>) -> Self {
        Self {
            items,
            removed: Vec::new(),
            dirty: false,
        }
    }

    /// Returns the current elements.
    #[must_use]
    pub fn items(&self) -> &[ObjectHandle] {
        &self.items
    }

    /// Returns elements removed since the list was loaded.
    #[must_use]
    pub fn removed(&self) -> &[ObjectHandle] {
        &self.removed
    }

    /// Returns true if the list changed since it was loaded.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Appends an element.
    pub fn push(&mut self, handle: ObjectHandle) {
        self.items.push(handle);
        self.dirty = true;
    }

    /// Removes an element, returning true if it was present.
    pub fn remove(&mut self, handle: ObjectHandle) -> bool {
        match self.items.iter().position(|h| *h == handle) {
            Some(pos) => {
                self.items.remove(pos);
                self.removed.push(handle);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The in-memory value of one persistent field.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    /// No value.
    #[default]
    Null,
    /// A scalar, key, or serialized value.
    Scalar(PropertyValue),
    /// An embedded object.
    Embedded(EmbeddedObject),
    /// A single related object.
    Ref(ObjectHandle),
    /// Related objects, as set by the application.
    Refs(Vec<ObjectHandle>),
    /// Related objects, as loaded or flushed by the session.
    Tracked(ScoList),
}

impl FieldValue {
    /// Returns true for [`FieldValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the scalar value, if any.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&PropertyValue> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the single related object, if any.
    #[must_use]
    pub fn as_handle(&self) -> Option<ObjectHandle> {
        match self {
            Self::Ref(h) => Some(*h),
            _ => None,
        }
    }

    /// Returns the embedded object, if any.
    #[must_use]
    pub fn as_embedded(&self) -> Option<&EmbeddedObject> {
        match self {
            Self::Embedded(e) => Some(e),
            _ => None,
        }
    }

    /// Returns every related object referenced by this value.
    #[must_use]
    pub fn handles(&self) -> Vec<ObjectHandle> {
        match self {
            Self::Ref(h) => vec![*h],
            Self::Refs(items) => items.clone(),
            Self::Tracked(list) => list.items().to_vec(),
            Self::Null | Self::Scalar(_) | Self::Embedded(_) => Vec::new(),
        }
    }
}

/// Wraps a container-valued relation so later mutation is tracked.
///
/// Applied to every relation load and flush regardless of cardinality;
/// single references and nulls pass through unchanged.
#[must_use]
pub fn wrap_sco_field(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::Refs(items) => FieldValue::Tracked(ScoList::new(items)),
        FieldValue::Tracked(list) if list.is_dirty() => {
            FieldValue::Tracked(ScoList::new(list.items))
        }
        other => other,
    }
}

impl From<PropertyValue> for FieldValue {
    fn from(v: PropertyValue) -> Self {
        match v {
            PropertyValue::Null => Self::Null,
            other => Self::Scalar(other),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Scalar(s.into())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Scalar(s.into())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Scalar(n.into())
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        Self::Scalar(n.into())
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        Self::Scalar(f.into())
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Scalar(b.into())
    }
}

impl From<StoreKey> for FieldValue {
    fn from(k: StoreKey) -> Self {
        Self::Scalar(k.into())
    }
}

impl From<Vec<PropertyValue>> for FieldValue {
    fn from(items: Vec<PropertyValue>) -> Self {
        Self::Scalar(PropertyValue::List(items))
    }
}

impl From<ObjectHandle> for FieldValue {
    fn from(h: ObjectHandle) -> Self {
        Self::Ref(h)
    }
}

impl From<Vec<ObjectHandle>> for FieldValue {
    fn from(items: Vec<ObjectHandle>) -> Self {
        Self::Refs(items)
    }
}

impl From<EmbeddedObject> for FieldValue {
    fn from(e: EmbeddedObject) -> Self {
        Self::Embedded(e)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// State of one mapped object.
#[derive(Debug, Clone)]
pub struct ObjectState {
    pub(crate) class: Arc<ClassMeta>,
    pub(crate) fields: BTreeMap<String, FieldValue>,
    pub(crate) key: Option<StoreKey>,
    pub(crate) version: Option<i64>,
    pub(crate) lifecycle: Lifecycle,
    /// Fields whose in-memory value is authoritative. Unloaded relation
    /// fields are neither read nor written on update.
    pub(crate) loaded: BTreeSet<String>,
    /// The entity as last written or read.
    pub(crate) entity: Option<Entity>,
}

impl ObjectState {
    pub(crate) fn new(class: Arc<ClassMeta>) -> Self {
        Self {
            class,
            fields: BTreeMap::new(),
            key: None,
            version: None,
            lifecycle: Lifecycle::Transient,
            loaded: BTreeSet::new(),
            entity: None,
        }
    }

    /// Returns the class metadata.
    #[must_use]
    pub fn class(&self) -> &Arc<ClassMeta> {
        &self.class
    }

    /// Returns the key, once assigned.
    #[must_use]
    pub fn key(&self) -> Option<&StoreKey> {
        self.key.as_ref()
    }

    /// Returns the last-known version of a versioned object.
    #[must_use]
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Returns true once the object has been stored.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.lifecycle == Lifecycle::Persistent
    }

    /// Returns a field value; unset fields read as null.
    #[must_use]
    pub fn field(&self, name: &str) -> FieldValue {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    /// Returns true if the field has been set or loaded.
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
        self.loaded.insert(name.to_string());
    }
}

/// Owner of every object in a session.
#[derive(Debug, Default)]
pub(crate) struct ObjectArena {
    objects: Vec<ObjectState>,
}

impl ObjectArena {
    pub(crate) fn insert(&mut self, state: ObjectState) -> ObjectHandle {
        self.objects.push(state);
        ObjectHandle(self.objects.len() - 1)
    }

    pub(crate) fn get(&self, handle: ObjectHandle) -> CoreResult<&ObjectState> {
        self.objects
            .get(handle.0)
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown object {handle}")))
    }

    pub(crate) fn get_mut(&mut self, handle: ObjectHandle) -> CoreResult<&mut ObjectState> {
        self.objects
            .get_mut(handle.0)
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown object {handle}")))
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }
}
