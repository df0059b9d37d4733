//! Fixture classes and session helpers.
//!
//! The fixture classes cover every field and relation shape the mapping
//! layer supports: flights with versioning, one-to-one owners and their
//! dependent children under each cascade, embeddables, multi-valued and
//! serialized properties, and one-to-many collections.

use entigroup_core::{
    AncestorKind, Cascade, ClassMeta, EmbeddedMeta, FieldMeta, MappingConfig, MetadataRegistry,
    NullPolicy, PrimaryKeyKind, RelationMeta, ScalarType, Session,
};
use entigroup_storage::InMemoryDatastore;
use std::sync::Arc;

/// Store column of `HasOneToOneJDO.flight`.
pub const FLIGHT_COLUMN: &str = "flight_id";

/// Store column of `HasOneToOneJDO.has_parent`.
pub const HAS_PARENT_COLUMN: &str = "hasparent_id";

/// Version column of `HasVersionNoField`.
pub const CUSTOM_VERSION_COLUMN: &str = "myversioncolumn";

fn encoded_pk() -> FieldMeta {
    FieldMeta::primary_key("id", PrimaryKeyKind::EncodedString)
}

fn text(name: &str) -> FieldMeta {
    FieldMeta::scalar(name, ScalarType::Text)
}

fn dependent_child(name: &str) -> ClassMeta {
    ClassMeta::new(name)
        .field(encoded_pk())
        .field(FieldMeta::ancestor("ancestor_id", AncestorKind::EncodedString))
        .field(text("name"))
}

fn classes() -> Vec<ClassMeta> {
    vec![
        ClassMeta::new("Flight")
            .versioned()
            .field(encoded_pk())
            .field(text("origin"))
            .field(text("dest"))
            .field(text("name"))
            .field(FieldMeta::scalar("you", ScalarType::Integer))
            .field(FieldMeta::scalar("me", ScalarType::Integer))
            .field(FieldMeta::scalar("flight_number", ScalarType::Integer)),
        ClassMeta::new("HasOneToOne")
            .with_kind("HasOneToOneJDO")
            .field(encoded_pk())
            .field(text("str"))
            .field(
                FieldMeta::relation(
                    "flight",
                    RelationMeta::one_to_one("Flight").cascade(Cascade::All),
                )
                .column(FLIGHT_COLUMN),
            )
            .field(
                FieldMeta::relation(
                    "has_parent",
                    RelationMeta::one_to_one("HasOneToOneParent")
                        .cascade(Cascade::All)
                        .mapped_by("parent"),
                )
                .column(HAS_PARENT_COLUMN),
            ),
        ClassMeta::new("HasOneToOneParent")
            .field(encoded_pk())
            .field(text("str"))
            .field(FieldMeta::relation(
                "parent",
                RelationMeta::one_to_one("HasOneToOne").ancestor_provider(),
            )),
        ClassMeta::new("HasOneToOnesWithDifferentCascades")
            .field(encoded_pk())
            .field(FieldMeta::relation(
                "cascade_all",
                RelationMeta::one_to_one("CascadeAllChild").cascade(Cascade::All),
            ))
            .field(FieldMeta::relation(
                "cascade_persist",
                RelationMeta::one_to_one("CascadePersistChild").cascade(Cascade::Persist),
            ))
            .field(FieldMeta::relation(
                "cascade_remove",
                RelationMeta::one_to_one("CascadeRemoveChild").cascade(Cascade::Remove),
            )),
        dependent_child("CascadeAllChild"),
        dependent_child("CascadePersistChild"),
        dependent_child("CascadeRemoveChild"),
        ClassMeta::new("HasStrictOneToOne")
            .field(FieldMeta::primary_key("key", PrimaryKeyKind::Key))
            .field(
                FieldMeta::relation("child", RelationMeta::one_to_one("StrictChild"))
                    .null_policy(NullPolicy::Exception),
            ),
        ClassMeta::new("StrictChild")
            .field(FieldMeta::primary_key("key", PrimaryKeyKind::Key))
            .field(FieldMeta::relation(
                "owner",
                RelationMeta::one_to_one("HasStrictOneToOne").ancestor_provider(),
            )),
        ClassMeta::embeddable("Name")
            .field(text("first"))
            .field(text("last")),
        ClassMeta::new("Person")
            .field(FieldMeta::primary_key("id", PrimaryKeyKind::Id))
            .field(FieldMeta::embedded("name", EmbeddedMeta::new("Name")))
            .field(FieldMeta::embedded(
                "another_name",
                EmbeddedMeta::new("Name")
                    .with_override("first", "anotherFirst")
                    .with_override("last", "anotherLast"),
            )),
        ClassMeta::new("HasVersionNoField")
            .versioned_column(CUSTOM_VERSION_COLUMN)
            .field(FieldMeta::primary_key("id", PrimaryKeyKind::Id))
            .field(text("value")),
        ClassMeta::new("HasVersionWithField")
            .versioned()
            .field(FieldMeta::primary_key("id", PrimaryKeyKind::Id))
            .field(FieldMeta::version("version"))
            .field(text("value")),
        ClassMeta::new("KitchenSink")
            .field(encoded_pk())
            .field(text("str"))
            .field(FieldMeta::scalar("int", ScalarType::Integer))
            .field(FieldMeta::scalar("float", ScalarType::Float))
            .field(FieldMeta::scalar("flag", ScalarType::Bool))
            .field(FieldMeta::scalar("bytes", ScalarType::Bytes))
            .field(FieldMeta::scalar("date", ScalarType::DateTime))
            .field(FieldMeta::scalar("key", ScalarType::Key))
            .field(FieldMeta::scalar(
                "strs",
                ScalarType::List(Box::new(ScalarType::Text)),
            ))
            .field(
                FieldMeta::scalar("required", ScalarType::Integer)
                    .null_policy(NullPolicy::Default),
            ),
        ClassMeta::new("HasAncestor")
            .field(encoded_pk())
            .field(FieldMeta::ancestor("ancestor_id", AncestorKind::EncodedString))
            .field(text("name")),
        ClassMeta::new("HasKeyAncestor")
            .field(FieldMeta::primary_key("key", PrimaryKeyKind::Key))
            .field(FieldMeta::ancestor("parent_key", AncestorKind::Key)),
        ClassMeta::new("Book")
            .field(encoded_pk())
            .field(text("title"))
            .field(text("isbn")),
        ClassMeta::new("HasMultiValueProps")
            .field(FieldMeta::primary_key("id", PrimaryKeyKind::Id))
            .field(FieldMeta::scalar(
                "strings",
                ScalarType::List(Box::new(ScalarType::Text)),
            ))
            .field(FieldMeta::scalar(
                "numbers",
                ScalarType::Set(Box::new(ScalarType::Integer)),
            )),
        ClassMeta::new("HasSerialized")
            .field(FieldMeta::primary_key("id", PrimaryKeyKind::Id))
            .field(FieldMeta::serialized("blob")),
        ClassMeta::new("HasNamePk")
            .field(FieldMeta::primary_key("name", PrimaryKeyKind::Name))
            .field(text("value")),
        ClassMeta::new("HasLongPk")
            .field(FieldMeta::primary_key("id", PrimaryKeyKind::Id))
            .field(text("value")),
        ClassMeta::new("HasOneToManyList")
            .field(encoded_pk())
            .field(text("val"))
            .field(FieldMeta::relation(
                "books",
                RelationMeta::one_to_many("Book").cascade(Cascade::All),
            ))
            .field(FieldMeta::relation(
                "bidir",
                RelationMeta::one_to_many("BidirChild").mapped_by("parent"),
            )),
        ClassMeta::new("BidirChild")
            .field(encoded_pk())
            .field(text("child_val"))
            .field(FieldMeta::relation(
                "parent",
                RelationMeta::many_to_one("HasOneToManyList"),
            )),
    ]
}

/// Returns a registry holding every fixture class.
///
/// # Panics
///
/// Panics if a fixture class fails validation.
pub fn metadata() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();
    for class in classes() {
        registry
            .register(class)
            .expect("fixture class should be valid");
    }
    registry
        .validate_references()
        .expect("fixture references should resolve");
    registry
}

/// A session over a fresh in-memory store.
pub struct TestSession {
    /// The session.
    pub session: Session,
    /// The store, for direct reads that bypass the session.
    pub store: Arc<InMemoryDatastore>,
    metadata: Arc<MetadataRegistry>,
}

impl TestSession {
    /// Creates a session with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MappingConfig::default())
    }

    /// Creates a session with the given configuration.
    pub fn with_config(config: MappingConfig) -> Self {
        let store = Arc::new(InMemoryDatastore::new());
        let metadata = Arc::new(metadata());
        let session = Session::new(store.clone(), metadata.clone(), config)
            .expect("fixture session should open");
        Self {
            session,
            store,
            metadata,
        }
    }

    /// Opens another session onto the same committed data.
    ///
    /// The new session has its own store handle, and so its own store
    /// transaction, the way a separate client would.
    pub fn second_session(&self) -> Session {
        let store = Arc::new(self.store.handle());
        Session::new(store, self.metadata.clone(), self.session.config().clone())
            .expect("fixture session should open")
    }
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestSession {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl std::ops::DerefMut for TestSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

/// Runs a test with a session over a fresh store.
pub fn with_session<F, R>(f: F) -> R
where
    F: FnOnce(&mut Session) -> R,
{
    let mut test = TestSession::new();
    f(&mut test.session)
}
