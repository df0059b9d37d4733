//! Closed classification of field mappings.
//!
//! Every persistent field falls into exactly one [`MappingKind`]. The field
//! and relation managers dispatch on this enum with exhaustive matches, so
//! adding a relationship shape is a compile error until every site handles it.

use crate::metadata::{FieldKind, FieldMeta, RelationShape};

/// How a field is projected onto the owning entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    /// Part of the entity's own key.
    PrimaryKey,
    /// The parent segment of the entity's own key.
    Ancestor,
    /// Mirror of the version property.
    Version,
    /// One property.
    Scalar,
    /// Several properties, flattened.
    Embedded,
    /// One byte property.
    Serialized,
    /// Related object is this entity's parent: resolved through the key.
    ParentReference,
    /// Related object is a single child keyed under this entity.
    ChildReference,
    /// Related objects are children keyed under this entity.
    ChildCollection,
}

/// How a deferred relation event is applied once the owner has a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationEventKind {
    /// Written into the owner's entity through the mapping.
    Serialized,
    /// The related object's key is written into the owner's entity.
    PersistableReference,
    /// Nothing is written on the owner; the relation lives in child keys.
    ForeignKeyStyle,
}

impl MappingKind {
    /// Classifies a field.
    #[must_use]
    pub fn of(field: &FieldMeta) -> Self {
        match field.kind() {
            FieldKind::PrimaryKey(_) => Self::PrimaryKey,
            FieldKind::Ancestor(_) => Self::Ancestor,
            FieldKind::Version => Self::Version,
            FieldKind::Scalar(_) => Self::Scalar,
            FieldKind::Embedded(_) => Self::Embedded,
            FieldKind::Serialized => Self::Serialized,
            FieldKind::Relation(meta) => match meta.shape() {
                RelationShape::OneToMany => Self::ChildCollection,
                _ if meta.is_ancestor_provider() => Self::ParentReference,
                RelationShape::OneToOne | RelationShape::ManyToOne => Self::ChildReference,
            },
        }
    }

    /// Returns true if writes of this field are deferred until the owner has a key.
    #[must_use]
    pub fn is_deferred(self) -> bool {
        self.event_kind().is_some()
    }

    /// Returns true if the field refers to other persistent objects.
    #[must_use]
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            Self::ParentReference | Self::ChildReference | Self::ChildCollection
        )
    }

    /// Returns true if the related objects are keyed under the owner.
    #[must_use]
    pub fn owns_children(self) -> bool {
        matches!(self, Self::ChildReference | Self::ChildCollection)
    }

    /// Returns how a deferred write of this field is applied.
    #[must_use]
    pub fn event_kind(self) -> Option<RelationEventKind> {
        match self {
            Self::Serialized => Some(RelationEventKind::Serialized),
            Self::ChildReference => Some(RelationEventKind::PersistableReference),
            Self::ParentReference | Self::ChildCollection => {
                Some(RelationEventKind::ForeignKeyStyle)
            }
            Self::PrimaryKey | Self::Ancestor | Self::Version | Self::Scalar | Self::Embedded => {
                None
            }
        }
    }
}
