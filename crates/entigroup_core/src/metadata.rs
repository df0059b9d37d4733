//! Class and field metadata.
//!
//! Metadata is produced by an external collaborator (annotation or XML
//! parsing) and registered here. Registration validates field types up
//! front so that unsupported types fail fast, before any object is
//! persisted.

use crate::error::{CoreError, CoreResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Declared type of a scalar field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarType {
    /// UTF-8 text.
    Text,
    /// Any integral type, widened to 64 bits.
    Integer,
    /// Floating point.
    Float,
    /// Boolean.
    Bool,
    /// Byte array.
    Bytes,
    /// Date and time.
    DateTime,
    /// A store key.
    Key,
    /// Ordered, multi-valued.
    List(Box<ScalarType>),
    /// Unordered, de-duplicated, multi-valued.
    Set(Box<ScalarType>),
    /// A type with no store representation, named for error messages.
    Unsupported(String),
}

impl ScalarType {
    /// Returns the unsupported type name, if any part of this type is unsupported.
    fn unsupported_part(&self) -> Option<String> {
        match self {
            Self::Unsupported(name) => Some(name.clone()),
            Self::List(inner) | Self::Set(inner) => match inner.as_ref() {
                Self::List(_) | Self::Set(_) => Some(format!("nested collection {self:?}")),
                other => other.unsupported_part(),
            },
            _ => None,
        }
    }
}

/// How a primary key field represents the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryKeyKind {
    /// The full key, encoded as a string.
    EncodedString,
    /// The full key, as a [`entigroup_codec::StoreKey`].
    Key,
    /// The numeric id only.
    Id,
    /// The key name only. Must be supplied by the application.
    Name,
}

/// How an ancestor field represents the parent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AncestorKind {
    /// Encoded string.
    EncodedString,
    /// Native key.
    Key,
}

/// Which lifecycle operations follow a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cascade {
    /// Nothing cascades.
    None,
    /// Persisting the owner persists the related object.
    #[default]
    Persist,
    /// Deleting the owner deletes the related object.
    Remove,
    /// Both.
    All,
}

impl Cascade {
    /// Returns true if persist cascades.
    #[must_use]
    pub fn includes_persist(self) -> bool {
        matches!(self, Self::Persist | Self::All)
    }

    /// Returns true if remove cascades.
    #[must_use]
    pub fn includes_remove(self) -> bool {
        matches!(self, Self::Remove | Self::All)
    }
}

/// What to do with a null value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullPolicy {
    /// Store null.
    #[default]
    None,
    /// Reject null, and reject deferring a relation write.
    Exception,
    /// Store the type's default value.
    Default,
}

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationShape {
    /// One-to-one.
    OneToOne,
    /// Many-to-one; this side is always the child.
    ManyToOne,
    /// One-to-many; this side is always the parent.
    OneToMany,
}

/// Metadata of a relation field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMeta {
    target: String,
    shape: RelationShape,
    cascade: Cascade,
    ancestor_provider: bool,
    mapped_by: Option<String>,
}

impl RelationMeta {
    fn new(target: impl Into<String>, shape: RelationShape) -> Self {
        Self {
            target: target.into(),
            shape,
            cascade: Cascade::default(),
            ancestor_provider: false,
            mapped_by: None,
        }
    }

    /// A one-to-one where this side owns the related object as a child.
    pub fn one_to_one(target: impl Into<String>) -> Self {
        Self::new(target, RelationShape::OneToOne)
    }

    /// A many-to-one; the related object is this object's parent.
    pub fn many_to_one(target: impl Into<String>) -> Self {
        Self::new(target, RelationShape::ManyToOne)
    }

    /// A one-to-many; the related objects are children of this object.
    pub fn one_to_many(target: impl Into<String>) -> Self {
        Self::new(target, RelationShape::OneToMany)
    }

    /// Marks a one-to-one as the child side: this object's key's parent is
    /// the related object.
    #[must_use]
    pub fn ancestor_provider(mut self) -> Self {
        self.ancestor_provider = true;
        self
    }

    /// Sets the cascade.
    #[must_use]
    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    /// Names the field on the other side of a bidirectional relation.
    #[must_use]
    pub fn mapped_by(mut self, field: impl Into<String>) -> Self {
        self.mapped_by = Some(field.into());
        self
    }

    /// Returns the target class name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the shape.
    #[must_use]
    pub fn shape(&self) -> RelationShape {
        self.shape
    }

    /// Returns the cascade.
    #[must_use]
    pub fn cascade_kind(&self) -> Cascade {
        self.cascade
    }

    /// Returns true if the related object is this object's parent.
    #[must_use]
    pub fn is_ancestor_provider(&self) -> bool {
        self.ancestor_provider || self.shape == RelationShape::ManyToOne
    }

    /// Returns the inverse field name.
    #[must_use]
    pub fn inverse(&self) -> Option<&str> {
        self.mapped_by.as_deref()
    }
}

/// Metadata of an embedded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedMeta {
    class: String,
    prefix: String,
    overrides: BTreeMap<String, String>,
}

impl EmbeddedMeta {
    /// Embeds `class` with its columns unprefixed.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            prefix: String::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// Prefixes every nested column.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Maps one nested field to an explicit property name.
    #[must_use]
    pub fn with_override(mut self, field: impl Into<String>, property: impl Into<String>) -> Self {
        self.overrides.insert(field.into(), property.into());
        self
    }

    /// Returns the embeddable class name.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Returns the property name for a nested column.
    #[must_use]
    pub fn property_name(&self, field: &FieldMeta) -> String {
        match self.overrides.get(field.name()) {
            Some(property) => property.clone(),
            None => format!("{}{}", self.prefix, field.column_name()),
        }
    }
}

/// What a field maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// The primary key.
    PrimaryKey(PrimaryKeyKind),
    /// The parent key.
    Ancestor(AncestorKind),
    /// Mirrors the version property onto the object.
    Version,
    /// A single store property.
    Scalar(ScalarType),
    /// Several properties on the owner's entity.
    Embedded(EmbeddedMeta),
    /// One byte property holding the encoded value.
    Serialized,
    /// A relation to another persistent class.
    Relation(RelationMeta),
}

/// Metadata of one persistent field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    name: String,
    column: String,
    kind: FieldKind,
    null_policy: NullPolicy,
}

impl FieldMeta {
    /// Creates a field whose column is its name.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            null_policy: NullPolicy::default(),
        }
    }

    /// A primary key field.
    pub fn primary_key(name: impl Into<String>, kind: PrimaryKeyKind) -> Self {
        Self::new(name, FieldKind::PrimaryKey(kind))
    }

    /// An ancestor field.
    pub fn ancestor(name: impl Into<String>, kind: AncestorKind) -> Self {
        Self::new(name, FieldKind::Ancestor(kind))
    }

    /// A version mirror field.
    pub fn version(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Version)
    }

    /// A scalar field.
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self::new(name, FieldKind::Scalar(ty))
    }

    /// An embedded field.
    pub fn embedded(name: impl Into<String>, meta: EmbeddedMeta) -> Self {
        Self::new(name, FieldKind::Embedded(meta))
    }

    /// A serialized field.
    pub fn serialized(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Serialized)
    }

    /// A relation field.
    pub fn relation(name: impl Into<String>, meta: RelationMeta) -> Self {
        Self::new(name, FieldKind::Relation(meta))
    }

    /// Sets the store column name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Sets the null policy.
    #[must_use]
    pub fn null_policy(mut self, policy: NullPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the store column name.
    #[must_use]
    pub fn column_name(&self) -> &str {
        &self.column
    }

    /// Returns the field kind.
    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Returns the null policy.
    #[must_use]
    pub fn policy(&self) -> NullPolicy {
        self.null_policy
    }

    /// Returns true for the primary key.
    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        matches!(self.kind, FieldKind::PrimaryKey(_))
    }

    /// Returns true for a version mirror.
    #[must_use]
    pub fn is_version(&self) -> bool {
        matches!(self.kind, FieldKind::Version)
    }

    /// Returns the relation metadata, if this is a relation.
    #[must_use]
    pub fn relation_meta(&self) -> Option<&RelationMeta> {
        match &self.kind {
            FieldKind::Relation(meta) => Some(meta),
            _ => None,
        }
    }

    /// Returns the relation shape, if this is a relation.
    #[must_use]
    pub fn relation_kind(&self) -> Option<RelationShape> {
        self.relation_meta().map(RelationMeta::shape)
    }

    /// Returns the cascade; non-relations never cascade.
    #[must_use]
    pub fn cascade(&self) -> Cascade {
        self.relation_meta()
            .map_or(Cascade::None, RelationMeta::cascade_kind)
    }
}

/// Optimistic versioning of a class.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionMeta {
    column: Option<String>,
}

/// Metadata of a persistent or embeddable class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMeta {
    name: String,
    kind: String,
    fields: Vec<FieldMeta>,
    version: Option<VersionMeta>,
    embeddable: bool,
}

impl ClassMeta {
    /// A persistent class whose store kind is its name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: name.clone(),
            name,
            fields: Vec::new(),
            version: None,
            embeddable: false,
        }
    }

    /// An embeddable class. It has no kind and no key.
    pub fn embeddable(name: impl Into<String>) -> Self {
        Self {
            embeddable: true,
            ..Self::new(name)
        }
    }

    /// Sets the store kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    /// Enables versioning under the default version property.
    #[must_use]
    pub fn versioned(mut self) -> Self {
        self.version = Some(VersionMeta::default());
        self
    }

    /// Enables versioning under a named column.
    #[must_use]
    pub fn versioned_column(mut self, column: impl Into<String>) -> Self {
        self.version = Some(VersionMeta {
            column: Some(column.into()),
        });
        self
    }

    /// Returns the class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the store kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    /// Looks up a field.
    #[must_use]
    pub fn field_named(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a field, failing if absent.
    pub fn require_field(&self, name: &str) -> CoreResult<&FieldMeta> {
        self.field_named(name)
            .ok_or_else(|| CoreError::unknown_field(&self.name, name))
    }

    /// Returns the primary key field.
    #[must_use]
    pub fn primary_key(&self) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.is_primary_key())
    }

    /// Returns the ancestor field.
    #[must_use]
    pub fn ancestor_field(&self) -> Option<&FieldMeta> {
        self.fields
            .iter()
            .find(|f| matches!(f.kind, FieldKind::Ancestor(_)))
    }

    /// Returns the version mirror field.
    #[must_use]
    pub fn version_field(&self) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.is_version())
    }

    /// Returns true if the class is versioned.
    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    /// Returns the version property, or `None` if the class is unversioned.
    #[must_use]
    pub fn version_property<'a>(&'a self, default: &'a str) -> Option<&'a str> {
        self.version
            .as_ref()
            .map(|v| v.column.as_deref().unwrap_or(default))
    }

    /// Returns true for embeddable classes.
    #[must_use]
    pub fn is_embeddable(&self) -> bool {
        self.embeddable
    }

    fn validate(&self) -> CoreResult<()> {
        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(CoreError::invalid_metadata(
                    &self.name,
                    format!("duplicate field {}", field.name),
                ));
            }
            if let FieldKind::Scalar(ty) = &field.kind {
                if let Some(type_name) = ty.unsupported_part() {
                    return Err(CoreError::UnsupportedFieldType {
                        class: self.name.clone(),
                        field: field.name.clone(),
                        type_name,
                    });
                }
            }
            if self.embeddable
                && !matches!(field.kind, FieldKind::Scalar(_) | FieldKind::Embedded(_))
            {
                return Err(CoreError::invalid_metadata(
                    &self.name,
                    format!("embeddable field {} must be scalar or embedded", field.name),
                ));
            }
        }

        let count = |pred: fn(&FieldMeta) -> bool| self.fields.iter().filter(|f| pred(f)).count();
        let keys = count(FieldMeta::is_primary_key);
        let ancestors = count(|f| matches!(f.kind, FieldKind::Ancestor(_)));
        let versions = count(FieldMeta::is_version);

        if !self.embeddable && keys != 1 {
            return Err(CoreError::invalid_metadata(
                &self.name,
                format!("expected exactly one primary key, found {keys}"),
            ));
        }
        if ancestors > 1 {
            return Err(CoreError::invalid_metadata(
                &self.name,
                "at most one ancestor field is allowed",
            ));
        }
        if versions > 0 && (versions > 1 || self.version.is_none()) {
            return Err(CoreError::invalid_metadata(
                &self.name,
                "a version field requires exactly one versioned class declaration",
            ));
        }
        Ok(())
    }
}

/// All registered class metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    classes: HashMap<String, Arc<ClassMeta>>,
    kinds: HashMap<String, String>,
}

impl MetadataRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedFieldType`] for fields the store
    /// cannot represent and [`CoreError::InvalidMetadata`] for structural
    /// problems such as a missing primary key or a reused kind.
    pub fn register(&mut self, class: ClassMeta) -> CoreResult<()> {
        class.validate()?;
        if self.classes.contains_key(class.name()) {
            return Err(CoreError::invalid_metadata(class.name(), "already registered"));
        }
        if !class.is_embeddable() {
            if let Some(existing) = self.kinds.get(class.kind()) {
                return Err(CoreError::invalid_metadata(
                    class.name(),
                    format!("kind {} is already used by {existing}", class.kind()),
                ));
            }
            self.kinds
                .insert(class.kind().to_string(), class.name().to_string());
        }
        self.classes
            .insert(class.name().to_string(), Arc::new(class));
        Ok(())
    }

    /// Registers a class, builder style.
    pub fn with(mut self, class: ClassMeta) -> CoreResult<Self> {
        self.register(class)?;
        Ok(self)
    }

    /// Looks up a class by name.
    pub fn class(&self, name: &str) -> CoreResult<Arc<ClassMeta>> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownClass {
                name: name.to_string(),
            })
    }

    /// Looks up the persistent class stored under a kind.
    pub fn class_for_kind(&self, kind: &str) -> CoreResult<Arc<ClassMeta>> {
        let name = self.kinds.get(kind).ok_or_else(|| CoreError::UnknownClass {
            name: kind.to_string(),
        })?;
        self.class(name)
    }

    /// Checks that every relation and embedded field names a registered
    /// class of the right sort.
    pub fn validate_references(&self) -> CoreResult<()> {
        for class in self.classes.values() {
            for field in class.fields() {
                match field.kind() {
                    FieldKind::Relation(meta) => {
                        let target = self.class(meta.target())?;
                        if target.is_embeddable() {
                            return Err(CoreError::invalid_metadata(
                                class.name(),
                                format!("relation {} targets embeddable {}", field.name(), target.name()),
                            ));
                        }
                    }
                    FieldKind::Embedded(meta) => {
                        let target = self.class(meta.class())?;
                        if !target.is_embeddable() {
                            return Err(CoreError::invalid_metadata(
                                class.name(),
                                format!("embedded {} is not embeddable", target.name()),
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Returns the number of registered classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flight() -> ClassMeta {
        ClassMeta::new("Flight")
            .field(FieldMeta::primary_key("id", PrimaryKeyKind::EncodedString))
            .field(FieldMeta::scalar("origin", ScalarType::Text))
            .versioned()
    }

    #[test]
    fn unsupported_types_fail_at_registration() {
        let class = flight().field(FieldMeta::scalar(
            "handle",
            ScalarType::Unsupported("FileHandle".into()),
        ));
        let err = MetadataRegistry::new().register(class).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedFieldType { ref field, .. } if field == "handle"));
    }

    #[test]
    fn nested_collections_are_unsupported() {
        let class = flight().field(FieldMeta::scalar(
            "grid",
            ScalarType::List(Box::new(ScalarType::List(Box::new(ScalarType::Integer)))),
        ));
        assert!(matches!(
            MetadataRegistry::new().register(class),
            Err(CoreError::UnsupportedFieldType { .. })
        ));
    }

    #[test]
    fn persistent_class_needs_one_primary_key() {
        let class = ClassMeta::new("NoKey").field(FieldMeta::scalar("a", ScalarType::Text));
        assert!(matches!(
            MetadataRegistry::new().register(class),
            Err(CoreError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn version_column_defaults_to_config() {
        let class = flight();
        assert_eq!(class.version_property("OPT_VERSION"), Some("OPT_VERSION"));

        let custom = ClassMeta::new("V")
            .field(FieldMeta::primary_key("id", PrimaryKeyKind::Id))
            .versioned_column("myversioncolumn");
        assert_eq!(custom.version_property("OPT_VERSION"), Some("myversioncolumn"));
    }

    #[test]
    fn dangling_relation_targets_are_reported() {
        let registry = MetadataRegistry::new()
            .with(flight().field(FieldMeta::relation(
                "child",
                RelationMeta::one_to_one("Missing"),
            )))
            .unwrap();
        assert!(matches!(
            registry.validate_references(),
            Err(CoreError::UnknownClass { .. })
        ));
    }

    #[test]
    fn kinds_resolve_to_classes() {
        let registry = MetadataRegistry::new()
            .with(flight().with_kind("FlightKind"))
            .unwrap();
        assert_eq!(registry.class_for_kind("FlightKind").unwrap().name(), "Flight");
        assert!(registry.class_for_kind("Flight").is_err());
    }

    #[test]
    fn cascade_flags() {
        assert!(Cascade::All.includes_persist() && Cascade::All.includes_remove());
        assert!(!Cascade::Remove.includes_persist());
        assert!(!Cascade::Persist.includes_remove());
        assert!(RelationMeta::many_to_one("P").is_ancestor_provider());
        assert!(!RelationMeta::one_to_one("C").is_ancestor_provider());
    }

    #[test]
    fn embedded_overrides_win_over_prefix() {
        let first = FieldMeta::scalar("first", ScalarType::Text);
        let last = FieldMeta::scalar("last", ScalarType::Text);
        let meta = EmbeddedMeta::new("Name")
            .prefix("other_")
            .with_override("first", "anotherFirst");
        assert_eq!(meta.property_name(&first), "anotherFirst");
        assert_eq!(meta.property_name(&last), "other_last");
    }
}
