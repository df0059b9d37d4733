//! Relation fields: deferred writes and fetch-time resolution.
//!
//! The store has no foreign keys and a transaction may only touch one
//! entity group, so relations are realized through ancestor keys. A child
//! cannot be keyed until its owner has a key, which is why every relation
//! write is queued during field population and applied in one pass by
//! [`RelationFieldManager::store_relations`] after the owner's first put.

use crate::cascade::Cascade;
use crate::error::{CoreError, CoreResult};
use crate::mapping::{MappingKind, RelationEventKind};
use crate::metadata::{FieldMeta, NullPolicy};
use crate::object::{wrap_sco_field, FieldValue, ObjectHandle};
use crate::session::SessionCore;
use entigroup_codec::{decode_serialized, encode_serialized, PropertyValue, StoreKey};
use entigroup_storage::{Entity, Query};
use tracing::{debug, trace};

/// A relation write captured during field population.
#[derive(Debug, Clone)]
pub struct PendingRelationEvent {
    /// How the event is applied.
    pub kind: RelationEventKind,
    /// Mapping of the field.
    pub mapping: MappingKind,
    /// The field.
    pub field: FieldMeta,
    /// The value set on the object.
    pub value: FieldValue,
}

/// Result of resolving the key a reference field should hold.
#[derive(Debug)]
pub enum RelationOutcome {
    /// The related object has this key.
    Ready(StoreKey),
    /// The related object is mid-insert and has no key yet.
    Deferred,
    /// The reference cannot be stored.
    Fatal(CoreError),
}

/// Queue of relation events for one insert or update.
#[derive(Debug, Default)]
pub struct RelationFieldManager {
    events: Vec<PendingRelationEvent>,
}

impl RelationFieldManager {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a relation or serialized field write. Other fields are ignored.
    pub fn store_relation_field(&mut self, field: &FieldMeta, value: FieldValue) {
        let mapping = MappingKind::of(field);
        if let Some(kind) = mapping.event_kind() {
            self.events.push(PendingRelationEvent {
                kind,
                mapping,
                field: field.clone(),
                value,
            });
        }
    }

    /// Returns the queued events in insertion order.
    #[must_use]
    pub fn pending(&self) -> &[PendingRelationEvent] {
        &self.events
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Applies every queued event against the owner's entity.
    ///
    /// The owner must already have a key. Registers the owner's transient
    /// children with the key registry first, then drains the queue in
    /// order. The queue is empty afterwards whether or not this succeeds.
    /// Returns true if the entity changed and must be written again.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotYetFlushed`] if a reference cannot be
    /// resolved yet and the field's null policy is
    /// [`NullPolicy::Exception`].
    pub(crate) fn store_relations(
        &mut self,
        entity: &mut Entity,
        owner: ObjectHandle,
        cascade: &mut Cascade<'_>,
    ) -> CoreResult<bool> {
        let events = std::mem::take(&mut self.events);
        let owner_key = entity.key().ok_or_else(|| {
            CoreError::invalid_operation("relations applied before the owner was stored")
        })?;
        cascade.register_key(owner, &owner_key)?;

        let mut changed = false;
        for event in events {
            let PendingRelationEvent {
                kind,
                mapping,
                field,
                value,
            } = event;
            trace!(field = field.name(), ?kind, %owner_key, "applying relation event");

            let loaded = match kind {
                RelationEventKind::Serialized => {
                    let property = match &value {
                        FieldValue::Null => PropertyValue::Null,
                        FieldValue::Scalar(inner) => PropertyValue::Bytes(encode_serialized(inner)?),
                        other => {
                            return Err(CoreError::illegal_argument(format!(
                                "serialized field {} cannot hold {other:?}",
                                field.name()
                            )))
                        }
                    };
                    changed |= set_if_changed(entity, field.column_name(), property);
                    value
                }
                RelationEventKind::PersistableReference => {
                    let property = match &value {
                        FieldValue::Null if field.policy() == NullPolicy::Exception => {
                            return Err(CoreError::illegal_argument(format!(
                                "{} must not be null",
                                field.name()
                            )));
                        }
                        FieldValue::Null => PropertyValue::Null,
                        FieldValue::Ref(child) => {
                            match cascade.resolve_child_key(owner, &owner_key, &field, *child) {
                                RelationOutcome::Ready(key) => PropertyValue::Key(key),
                                RelationOutcome::Deferred
                                    if field.policy() == NullPolicy::Exception =>
                                {
                                    return Err(CoreError::not_yet_flushed(
                                        entity.kind(),
                                        field.name(),
                                    ));
                                }
                                RelationOutcome::Deferred => {
                                    cascade.defer_write(owner, &field, *child);
                                    PropertyValue::Null
                                }
                                RelationOutcome::Fatal(err) => return Err(err),
                            }
                        }
                        other => {
                            return Err(CoreError::illegal_argument(format!(
                                "{} holds a single reference, got {other:?}",
                                field.name()
                            )))
                        }
                    };
                    changed |= set_if_changed(entity, field.column_name(), property);
                    value
                }
                RelationEventKind::ForeignKeyStyle => match mapping {
                    MappingKind::ChildCollection => {
                        cascade.sync_collection(owner, &owner_key, &field, value)?
                    }
                    _ => {
                        cascade.verify_parent(&owner_key, &field, &value)?;
                        value
                    }
                },
            };
            cascade.mark_loaded(owner, &field, wrap_sco_field(loaded))?;
        }
        Ok(changed)
    }

    /// Resolves a relation or serialized field of a stored entity.
    ///
    /// Serialized values come from the entity itself. A parent reference is
    /// a point read of the entity's parent key. A child reference is an
    /// ancestor query under the entity's key, capped at the configured query
    /// limit: no result reads as null and more than one is an error. A
    /// child collection is the same query without a cap. Container results
    /// are wrapped for change tracking.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AmbiguousOneToOne`] if a one-to-one finds more
    /// than one child, and [`CoreError::MissingAncestor`] if a parent
    /// reference is read from a root entity.
    pub(crate) fn fetch_relation_field(
        entity: &Entity,
        field: &FieldMeta,
        core: &mut SessionCore,
    ) -> CoreResult<FieldValue> {
        let value = match MappingKind::of(field) {
            MappingKind::Serialized => match entity.property(field.column_name()) {
                None | Some(PropertyValue::Null) => FieldValue::Null,
                Some(PropertyValue::Bytes(bytes)) => decode_serialized(bytes)?.into(),
                Some(other) => {
                    return Err(CoreError::illegal_argument(format!(
                        "serialized field {} holds {}",
                        field.name(),
                        other.type_name()
                    )))
                }
            },
            MappingKind::ParentReference => {
                let parent = entity.parent().ok_or_else(|| CoreError::MissingAncestor {
                    class: entity.kind().to_string(),
                    field: field.name().to_string(),
                })?;
                FieldValue::Ref(core.materialize_key(parent)?)
            }
            MappingKind::ChildReference => {
                let owner_key = stored_key(entity)?;
                let target = core.target_class(field)?;
                let mut limit = core.config.one_to_one_query_limit;
                if target.kind() == entity.kind() {
                    // The owner itself matches its own ancestor query
                    limit += 1;
                }
                let query = Query::new(target.kind())
                    .ancestor(owner_key.clone())
                    .limit(limit);
                let mut found = core.children(&query, &owner_key)?;
                if found.len() > 1 {
                    debug!(%owner_key, field = field.name(), found = found.len(), "one-to-one is ambiguous");
                    return Err(CoreError::AmbiguousOneToOne {
                        owner: owner_key,
                        field: field.name().to_string(),
                        found: found.len(),
                    });
                }
                match found.pop() {
                    Some(child) => FieldValue::Ref(core.materialize(child)?),
                    None => FieldValue::Null,
                }
            }
            MappingKind::ChildCollection => {
                let owner_key = stored_key(entity)?;
                let target = core.target_class(field)?;
                let query = Query::new(target.kind()).ancestor(owner_key.clone());
                let children = core.children(&query, &owner_key)?;
                let handles = children
                    .into_iter()
                    .map(|child| core.materialize(child))
                    .collect::<CoreResult<Vec<_>>>()?;
                FieldValue::Refs(handles)
            }
            MappingKind::PrimaryKey
            | MappingKind::Ancestor
            | MappingKind::Version
            | MappingKind::Scalar
            | MappingKind::Embedded => {
                return Err(CoreError::invalid_operation(format!(
                    "{} is not a relation field",
                    field.name()
                )))
            }
        };
        Ok(wrap_sco_field(value))
    }
}

fn stored_key(entity: &Entity) -> CoreResult<StoreKey> {
    entity
        .key()
        .ok_or_else(|| CoreError::invalid_operation("relation read from an unstored entity"))
}

fn set_if_changed(entity: &mut Entity, column: &str, property: PropertyValue) -> bool {
    if entity.property(column) == Some(&property) {
        return false;
    }
    entity.set_property(column, property);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{RelationMeta, ScalarType};

    #[test]
    fn only_deferred_mappings_are_queued_in_order() {
        let mut manager = RelationFieldManager::new();
        manager.store_relation_field(&FieldMeta::scalar("s", ScalarType::Text), "x".into());
        manager.store_relation_field(
            &FieldMeta::relation("child", RelationMeta::one_to_one("C")),
            FieldValue::Null,
        );
        manager.store_relation_field(&FieldMeta::serialized("blob"), 3i64.into());

        let kinds: Vec<_> = manager.pending().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RelationEventKind::PersistableReference,
                RelationEventKind::Serialized
            ]
        );
    }

    #[test]
    fn set_if_changed_reports_changes() {
        let mut entity = Entity::new("Owner");
        assert!(set_if_changed(&mut entity, "c", PropertyValue::Null));
        assert!(!set_if_changed(&mut entity, "c", PropertyValue::Null));
        assert!(set_if_changed(&mut entity, "c", PropertyValue::Integer(1)));
    }
}
