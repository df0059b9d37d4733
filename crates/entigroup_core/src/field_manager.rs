//! Field-by-field projection between objects and entities.
//!
//! A [`FieldManager`] owns the entity for one insert, update or fetch pass.
//! Scalars and embedded objects are written straight into it; relation and
//! serialized fields are handed to the [`RelationFieldManager`] as deferred
//! events, applied once the owner has a key.

use crate::config::MappingConfig;
use crate::embedded::EmbeddedFieldManager;
use crate::error::{CoreError, CoreResult};
use crate::mapping::MappingKind;
use crate::metadata::{
    AncestorKind, ClassMeta, FieldKind, FieldMeta, MetadataRegistry, NullPolicy, PrimaryKeyKind,
    ScalarType,
};
use crate::object::{FieldValue, ObjectState};
use crate::relation::RelationFieldManager;
use entigroup_codec::{decode_key, encode_key, KeyIdentity, PropertyValue, StoreKey};
use entigroup_storage::Entity;
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-operation context for reading and writing the fields of one object.
#[derive(Debug)]
pub struct FieldManager {
    class: Arc<ClassMeta>,
    metadata: Arc<MetadataRegistry>,
    version_property: Option<String>,
    entity: Entity,
    relations: RelationFieldManager,
}

impl FieldManager {
    fn with_entity(
        class: Arc<ClassMeta>,
        metadata: Arc<MetadataRegistry>,
        config: &MappingConfig,
        entity: Entity,
    ) -> Self {
        let version_property = class
            .version_property(&config.version_property)
            .map(str::to_string);
        Self {
            class,
            metadata,
            version_property,
            entity,
            relations: RelationFieldManager::new(),
        }
    }

    /// Starts an insert.
    ///
    /// The new entity's parent comes from `inherited` (the owner's key, when
    /// the object is inserted as a dependent child) or from the object's own
    /// ancestor field; the two must agree. Its identity comes from the
    /// primary key field if the application set one, otherwise the store
    /// allocates an id on the first put. A versioned entity starts at 1.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if the declared ancestor or a
    /// supplied full key disagrees with `inherited`.
    pub fn begin_insert(
        class: Arc<ClassMeta>,
        metadata: Arc<MetadataRegistry>,
        config: &MappingConfig,
        state: &ObjectState,
        inherited: Option<StoreKey>,
    ) -> CoreResult<Self> {
        let (parent, identity) = resolve_insert(&class, state, inherited)?;

        let mut entity = match parent {
            Some(parent) => Entity::with_parent(class.kind(), parent),
            None => Entity::new(class.kind()),
        };
        if let Some(identity) = identity {
            entity.assign_identity(identity)?;
        }

        let mut manager = Self::with_entity(class, metadata, config, entity);
        if let Some(column) = &manager.version_property {
            manager.entity.set_property(column.clone(), 1i64);
        }
        Ok(manager)
    }

    /// Starts an update of the entity currently stored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConcurrentModification`] if the stored version
    /// differs from `expected_version`. Nothing has been written at that point.
    pub fn begin_update(
        class: Arc<ClassMeta>,
        metadata: Arc<MetadataRegistry>,
        config: &MappingConfig,
        current: Entity,
        expected_version: Option<i64>,
    ) -> CoreResult<Self> {
        let manager = Self::with_entity(class, metadata, config, current);
        if manager.version_property.is_some() {
            let actual = manager.version().unwrap_or(0);
            let expected = expected_version.unwrap_or(0);
            if actual != expected {
                let key = manager.entity.key().ok_or_else(|| {
                    CoreError::invalid_operation("update of an entity without a key")
                })?;
                return Err(CoreError::ConcurrentModification {
                    key,
                    expected,
                    actual,
                });
            }
        }
        Ok(manager)
    }

    /// Starts a fetch from a stored entity.
    pub fn begin_fetch(
        class: Arc<ClassMeta>,
        metadata: Arc<MetadataRegistry>,
        config: &MappingConfig,
        entity: Entity,
    ) -> Self {
        Self::with_entity(class, metadata, config, entity)
    }

    /// Writes one field.
    ///
    /// Key, ancestor and version fields are carried by the entity itself and
    /// are skipped. Relation and serialized fields are queued.
    pub fn store_field(&mut self, field: &FieldMeta, value: &FieldValue) -> CoreResult<()> {
        match (MappingKind::of(field), field.kind()) {
            (MappingKind::Scalar, FieldKind::Scalar(ty)) => {
                let property = to_property(self.class.name(), field, ty, value)?;
                self.entity.set_property(field.column_name(), property);
            }
            (MappingKind::Embedded, FieldKind::Embedded(meta)) => {
                EmbeddedFieldManager::new(&self.metadata).store(&mut self.entity, meta, value)?;
            }
            (kind, _) if kind.is_deferred() => {
                self.relations.store_relation_field(field, value.clone());
            }
            _ => {}
        }
        Ok(())
    }

    /// Reads one field.
    ///
    /// # Errors
    ///
    /// Reference fields are resolved by the relation manager, and reading
    /// one here is an [`CoreError::InvalidOperation`].
    pub fn fetch_field(&self, field: &FieldMeta) -> CoreResult<FieldValue> {
        match (MappingKind::of(field), field.kind()) {
            (MappingKind::PrimaryKey, FieldKind::PrimaryKey(kind)) => {
                let key = self.entity.key().ok_or_else(|| {
                    CoreError::invalid_operation("fetch from an entity without a key")
                })?;
                render_primary_key(*kind, &key)
            }
            (MappingKind::Ancestor, FieldKind::Ancestor(kind)) => {
                render_ancestor(*kind, self.entity.parent())
            }
            (MappingKind::Version, _) => Ok(self.version().into()),
            (MappingKind::Scalar, FieldKind::Scalar(ty)) => {
                match self.entity.property(field.column_name()) {
                    Some(property) => from_property(self.class.name(), field, ty, property),
                    None => Ok(FieldValue::Null),
                }
            }
            (MappingKind::Embedded, FieldKind::Embedded(meta)) => {
                EmbeddedFieldManager::new(&self.metadata).fetch(&self.entity, meta)
            }
            _ => Err(CoreError::invalid_operation(format!(
                "{}.{} is resolved through the relation manager",
                self.class.name(),
                field.name()
            ))),
        }
    }

    /// Returns the version stored on the entity.
    #[must_use]
    pub fn version(&self) -> Option<i64> {
        let column = self.version_property.as_deref()?;
        self.entity.property(column).and_then(PropertyValue::as_integer)
    }

    /// Increments the version by exactly one, returning the new value.
    pub fn increment_version(&mut self) -> Option<i64> {
        let next = self.version().unwrap_or(0) + 1;
        let column = self.version_property.clone()?;
        self.entity.set_property(column, next);
        Some(next)
    }

    /// Rebuilds the pending entity under `parent`.
    ///
    /// Keys are immutable, so an entity that learns its ancestor after the
    /// pass began is re-created with the same identity and properties.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if the entity already has a
    /// different parent.
    pub fn recreate_entity_with_ancestor(&mut self, parent: StoreKey) -> CoreResult<()> {
        match self.entity.parent() {
            Some(existing) if *existing == parent => return Ok(()),
            Some(existing) => {
                return Err(CoreError::illegal_argument(format!(
                    "{} is already under {existing}, cannot move it under {parent}",
                    self.class.name()
                )));
            }
            None => {}
        }

        let mut entity = Entity::with_parent(self.class.kind(), parent);
        if let Some(identity) = self.entity.identity() {
            entity.assign_identity(identity.clone())?;
        }
        for (name, value) in self.entity.properties() {
            entity.set_property(name.clone(), value.clone());
        }
        trace!(class = self.class.name(), parent = ?entity.parent(), "re-created entity under ancestor");
        self.entity = entity;
        Ok(())
    }

    /// Returns the pending entity.
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Returns the class being mapped.
    #[must_use]
    pub fn class(&self) -> &Arc<ClassMeta> {
        &self.class
    }

    /// Ends the pass, handing over the entity and the queued relation events.
    #[must_use]
    pub fn into_parts(self) -> (Entity, RelationFieldManager) {
        (self.entity, self.relations)
    }
}

/// Resolves where a new entity will be keyed: its parent and its own
/// identity. The parent is `inherited`, the ancestor field or the parent of
/// a full primary key, and all that are present must agree.
fn resolve_insert(
    class: &ClassMeta,
    state: &ObjectState,
    inherited: Option<StoreKey>,
) -> CoreResult<(Option<StoreKey>, Option<KeyIdentity>)> {
    let declared = declared_ancestor(class, state)?;
    let mut parent = match (inherited, declared) {
        (Some(inherited), Some(declared)) if inherited != declared => {
            return Err(CoreError::illegal_argument(format!(
                "{} declares ancestor {declared} but is being stored under {inherited}",
                class.name()
            )));
        }
        (Some(inherited), _) => Some(inherited),
        (None, declared) => declared,
    };
    let identity = insert_identity(class, state, &mut parent)?;
    Ok((parent, identity))
}

/// Returns the parent a transient object would be stored under, given the
/// key it inherits from its owner.
///
/// # Errors
///
/// Returns [`CoreError::IllegalArgument`] if the ancestor field or a full
/// primary key places the object somewhere other than `inherited`.
pub(crate) fn planned_parent(
    class: &ClassMeta,
    state: &ObjectState,
    inherited: Option<StoreKey>,
) -> CoreResult<Option<StoreKey>> {
    resolve_insert(class, state, inherited).map(|(parent, _)| parent)
}

/// Resolves the identity of a new entity from its primary key field.
///
/// A full key supplied by the application also fixes the parent. An
/// encoded-string key whose value does not decode is taken as a key name;
/// this lets applications name keys directly but skips key validation.
fn insert_identity(
    class: &ClassMeta,
    state: &ObjectState,
    parent: &mut Option<StoreKey>,
) -> CoreResult<Option<KeyIdentity>> {
    let pk = class
        .primary_key()
        .ok_or_else(|| CoreError::invalid_metadata(class.name(), "no primary key"))?;
    let FieldKind::PrimaryKey(kind) = pk.kind() else {
        return Err(CoreError::invalid_metadata(class.name(), "no primary key"));
    };

    match (kind, state.field(pk.name())) {
        (PrimaryKeyKind::Name, FieldValue::Null) => Err(CoreError::illegal_argument(format!(
            "{}.{} is a key name and must be set before persisting",
            class.name(),
            pk.name()
        ))),
        (_, FieldValue::Null) => Ok(None),
        (PrimaryKeyKind::EncodedString, FieldValue::Scalar(PropertyValue::Text(text))) => {
            match decode_key(&text) {
                Ok(key) => adopt_full_key(class, key, parent).map(Some),
                Err(_) => {
                    debug!(class = class.name(), name = %text, "primary key value is not an encoded key, using it as the key name");
                    Ok(Some(KeyIdentity::name(text)?))
                }
            }
        }
        (PrimaryKeyKind::Key, FieldValue::Scalar(PropertyValue::Key(key))) => {
            adopt_full_key(class, key, parent).map(Some)
        }
        (PrimaryKeyKind::Id, FieldValue::Scalar(PropertyValue::Integer(id))) => {
            Ok(Some(KeyIdentity::id(id)?))
        }
        (PrimaryKeyKind::Name, FieldValue::Scalar(PropertyValue::Text(name))) => {
            Ok(Some(KeyIdentity::name(name)?))
        }
        (_, other) => Err(CoreError::illegal_argument(format!(
            "{}.{} cannot hold {other:?} as a primary key",
            class.name(),
            pk.name()
        ))),
    }
}

fn adopt_full_key(
    class: &ClassMeta,
    key: StoreKey,
    parent: &mut Option<StoreKey>,
) -> CoreResult<KeyIdentity> {
    if key.kind() != class.kind() {
        return Err(CoreError::illegal_argument(format!(
            "key {key} does not belong to kind {}",
            class.kind()
        )));
    }
    match parent.clone() {
        Some(expected) if key.parent() != Some(&expected) => {
            return Err(CoreError::illegal_argument(format!(
                "key {key} is not a child of {expected}"
            )));
        }
        Some(_) => {}
        None => *parent = key.parent().cloned(),
    }
    Ok(key.identity().clone())
}

/// Returns the ancestor an object declares through its ancestor field.
pub(crate) fn declared_ancestor(
    class: &ClassMeta,
    state: &ObjectState,
) -> CoreResult<Option<StoreKey>> {
    let Some(field) = class.ancestor_field() else {
        return Ok(None);
    };
    match state.field(field.name()) {
        FieldValue::Null => Ok(None),
        FieldValue::Scalar(PropertyValue::Text(encoded)) => Ok(Some(decode_key(&encoded)?)),
        FieldValue::Scalar(PropertyValue::Key(key)) => Ok(Some(key)),
        other => Err(CoreError::illegal_argument(format!(
            "{}.{} cannot hold {other:?} as an ancestor",
            class.name(),
            field.name()
        ))),
    }
}

/// Renders a key in a primary key field's representation.
pub(crate) fn render_primary_key(kind: PrimaryKeyKind, key: &StoreKey) -> CoreResult<FieldValue> {
    Ok(match kind {
        PrimaryKeyKind::EncodedString => FieldValue::from(encode_key(key)?),
        PrimaryKeyKind::Key => FieldValue::from(key.clone()),
        PrimaryKeyKind::Id => key.id().into(),
        PrimaryKeyKind::Name => key.name().map(str::to_string).into(),
    })
}

/// Renders a parent key in an ancestor field's representation.
pub(crate) fn render_ancestor(
    kind: AncestorKind,
    parent: Option<&StoreKey>,
) -> CoreResult<FieldValue> {
    let Some(parent) = parent else {
        return Ok(FieldValue::Null);
    };
    Ok(match kind {
        AncestorKind::EncodedString => FieldValue::from(encode_key(parent)?),
        AncestorKind::Key => FieldValue::from(parent.clone()),
    })
}

/// Converts a scalar field value to its store property, applying the
/// field's null policy.
pub(crate) fn to_property(
    class: &str,
    field: &FieldMeta,
    ty: &ScalarType,
    value: &FieldValue,
) -> CoreResult<PropertyValue> {
    match value {
        FieldValue::Null => match field.policy() {
            NullPolicy::None => Ok(PropertyValue::Null),
            NullPolicy::Default => Ok(default_value(ty)),
            NullPolicy::Exception => Err(CoreError::illegal_argument(format!(
                "{class}.{} must not be null",
                field.name()
            ))),
        },
        FieldValue::Scalar(property) => {
            coerce(ty, property).ok_or_else(|| mismatch(class, field, ty, property))
        }
        other => Err(CoreError::illegal_argument(format!(
            "{class}.{} expects {ty:?}, got {other:?}",
            field.name()
        ))),
    }
}

/// Converts a stored property back to a scalar field value.
///
/// A single value read for a multi-valued field is widened to a list.
pub(crate) fn from_property(
    class: &str,
    field: &FieldMeta,
    ty: &ScalarType,
    property: &PropertyValue,
) -> CoreResult<FieldValue> {
    let widened;
    let property = match (ty, property) {
        (ScalarType::List(_) | ScalarType::Set(_), value)
            if !matches!(value, PropertyValue::List(_) | PropertyValue::Null) =>
        {
            widened = PropertyValue::List(vec![value.clone()]);
            &widened
        }
        _ => property,
    };
    coerce(ty, property)
        .map(FieldValue::from)
        .ok_or_else(|| mismatch(class, field, ty, property))
}

fn mismatch(class: &str, field: &FieldMeta, ty: &ScalarType, property: &PropertyValue) -> CoreError {
    CoreError::illegal_argument(format!(
        "{class}.{} expects {ty:?}, got {}",
        field.name(),
        property.type_name()
    ))
}

#[allow(clippy::cast_precision_loss)]
fn coerce(ty: &ScalarType, value: &PropertyValue) -> Option<PropertyValue> {
    match (ty, value) {
        (_, PropertyValue::Null) => Some(PropertyValue::Null),
        (ScalarType::Text, PropertyValue::Text(_))
        | (ScalarType::Integer, PropertyValue::Integer(_))
        | (ScalarType::Float, PropertyValue::Float(_))
        | (ScalarType::Bool, PropertyValue::Bool(_))
        | (ScalarType::Bytes, PropertyValue::Bytes(_))
        | (ScalarType::DateTime, PropertyValue::DateTime(_))
        | (ScalarType::Key, PropertyValue::Key(_)) => Some(value.clone()),
        (ScalarType::Float, PropertyValue::Integer(n)) => Some(PropertyValue::Float(*n as f64)),
        (ScalarType::List(inner), PropertyValue::List(items)) => items
            .iter()
            .map(|item| coerce(inner, item))
            .collect::<Option<Vec<_>>>()
            .map(PropertyValue::List),
        (ScalarType::Set(inner), PropertyValue::List(items)) => {
            let mut items = items
                .iter()
                .map(|item| coerce(inner, item))
                .collect::<Option<Vec<_>>>()?;
            items.sort_by(PropertyValue::cmp_loose);
            items.dedup();
            Some(PropertyValue::List(items))
        }
        _ => None,
    }
}

fn default_value(ty: &ScalarType) -> PropertyValue {
    match ty {
        ScalarType::Text => PropertyValue::Text(String::new()),
        ScalarType::Integer => PropertyValue::Integer(0),
        ScalarType::Float => PropertyValue::Float(0.0),
        ScalarType::Bool => PropertyValue::Bool(false),
        ScalarType::Bytes => PropertyValue::Bytes(Vec::new()),
        ScalarType::List(_) | ScalarType::Set(_) => PropertyValue::List(Vec::new()),
        ScalarType::DateTime | ScalarType::Key | ScalarType::Unsupported(_) => PropertyValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flight() -> Arc<ClassMeta> {
        Arc::new(
            ClassMeta::new("Flight")
                .field(FieldMeta::primary_key("id", PrimaryKeyKind::EncodedString))
                .field(FieldMeta::ancestor("parent", AncestorKind::EncodedString))
                .field(FieldMeta::scalar("origin", ScalarType::Text))
                .field(FieldMeta::scalar("you", ScalarType::Integer).null_policy(NullPolicy::Default))
                .versioned(),
        )
    }

    fn begin(state: &ObjectState, inherited: Option<StoreKey>) -> CoreResult<FieldManager> {
        FieldManager::begin_insert(
            state.class().clone(),
            Arc::new(MetadataRegistry::new()),
            &MappingConfig::default(),
            state,
            inherited,
        )
    }

    #[test]
    fn insert_starts_version_at_one() {
        let state = ObjectState::new(flight());
        let manager = begin(&state, None).unwrap();
        assert_eq!(manager.version(), Some(1));
        assert!(!manager.entity().is_complete());
    }

    #[test]
    fn undecodable_encoded_key_becomes_name() {
        let mut state = ObjectState::new(flight());
        state.set_field("id", "foo".into());
        let manager = begin(&state, None).unwrap();
        assert_eq!(manager.entity().key().unwrap().name(), Some("foo"));
    }

    #[test]
    fn declared_ancestor_must_match_inherited() {
        let a = StoreKey::with_id("Parent", 1).unwrap();
        let b = StoreKey::with_id("Parent", 2).unwrap();
        let mut state = ObjectState::new(flight());
        state.set_field("parent", encode_key(&a).unwrap().into());

        assert!(begin(&state, Some(a.clone())).is_ok());
        let err = begin(&state, Some(b)).unwrap_err();
        assert!(matches!(err, CoreError::IllegalArgument { .. }));
    }

    #[test]
    fn stale_version_fails_before_any_write() {
        let class = flight();
        let mut stored = Entity::from_key(&StoreKey::with_id("Flight", 3).unwrap());
        stored.set_property("OPT_VERSION", 2i64);

        let err = FieldManager::begin_update(
            class,
            Arc::new(MetadataRegistry::new()),
            &MappingConfig::default(),
            stored,
            Some(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConcurrentModification { expected: 1, actual: 2, .. }
        ));
    }

    #[test]
    fn null_policies() {
        let class = flight();
        let mut manager = begin(&ObjectState::new(class.clone()), None).unwrap();
        let origin = class.field_named("origin").unwrap();
        let you = class.field_named("you").unwrap();

        manager.store_field(origin, &FieldValue::Null).unwrap();
        manager.store_field(you, &FieldValue::Null).unwrap();
        assert_eq!(manager.entity().property("origin"), Some(&PropertyValue::Null));
        assert_eq!(manager.entity().property("you"), Some(&PropertyValue::Integer(0)));

        let strict = FieldMeta::scalar("origin", ScalarType::Text).null_policy(NullPolicy::Exception);
        assert!(manager.store_field(&strict, &FieldValue::Null).is_err());
    }

    #[test]
    fn recreate_keeps_identity_and_properties() {
        let mut state = ObjectState::new(flight());
        state.set_field("id", "named".into());
        let mut manager = begin(&state, None).unwrap();
        manager
            .store_field(flight().field_named("origin").unwrap(), &"BOS".into())
            .unwrap();

        let parent = StoreKey::with_id("Parent", 9).unwrap();
        manager.recreate_entity_with_ancestor(parent.clone()).unwrap();
        let key = manager.entity().key().unwrap();
        assert_eq!(key.parent(), Some(&parent));
        assert_eq!(key.name(), Some("named"));
        assert_eq!(manager.entity().property("origin"), Some(&PropertyValue::from("BOS")));

        let other = StoreKey::with_id("Parent", 10).unwrap();
        assert!(manager.recreate_entity_with_ancestor(other).is_err());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let field = FieldMeta::scalar("n", ScalarType::Integer);
        let err = to_property("C", &field, &ScalarType::Integer, &"x".into()).unwrap_err();
        assert!(matches!(err, CoreError::IllegalArgument { .. }));
    }

    #[test]
    fn single_value_widens_for_list_fields() {
        let ty = ScalarType::List(Box::new(ScalarType::Text));
        let field = FieldMeta::scalar("tags", ty.clone());
        let value = from_property("C", &field, &ty, &PropertyValue::from("a")).unwrap();
        assert_eq!(value, vec![PropertyValue::from("a")].into());
    }

    proptest! {
        #[test]
        fn set_fields_are_sorted_and_unique(items in prop::collection::vec(-20i64..20, 0..16)) {
            let ty = ScalarType::Set(Box::new(ScalarType::Integer));
            let field = FieldMeta::scalar("s", ty.clone());
            let value: FieldValue = items.iter().copied().map(PropertyValue::from).collect::<Vec<_>>().into();
            let stored = to_property("C", &field, &ty, &value).unwrap();
            let list = stored.as_list().unwrap();
            prop_assert!(list.windows(2).all(|w| w[0].as_integer() < w[1].as_integer()));
            for item in &items {
                prop_assert!(list.contains(&PropertyValue::Integer(*item)));
            }
        }
    }
}
