//! # entigroup core
//!
//! Object mapping over an entity-group datastore.
//!
//! This crate provides:
//! - Class metadata: keys, ancestors, versions, scalar, embedded and
//!   serialized fields, and owned relations
//! - Field managers that turn objects into entities and back
//! - Relationship materialization through ancestor keys, so that an owner
//!   and its dependent children share one entity group
//! - A logical transaction bridged onto the store's transaction
//! - Translation of store failures, including failures raised lazily by
//!   query cursors
//!
//! ## Example
//!
//! ```rust
//! use entigroup_core::{
//!     ClassMeta, FieldMeta, MappingConfig, MetadataRegistry, PrimaryKeyKind, RelationMeta,
//!     ScalarType, Session,
//! };
//! use entigroup_storage::InMemoryDatastore;
//! use std::sync::Arc;
//!
//! let metadata = MetadataRegistry::new()
//!     .with(
//!         ClassMeta::new("Owner")
//!             .field(FieldMeta::primary_key("id", PrimaryKeyKind::Key))
//!             .field(FieldMeta::relation("child", RelationMeta::one_to_one("Child"))),
//!     )
//!     .unwrap()
//!     .with(
//!         ClassMeta::new("Child")
//!             .field(FieldMeta::primary_key("id", PrimaryKeyKind::Key))
//!             .field(FieldMeta::scalar("name", ScalarType::Text)),
//!     )
//!     .unwrap();
//!
//! let mut session = Session::new(Arc::new(InMemoryDatastore::new()), metadata, MappingConfig::default()).unwrap();
//! let owner = session.new_object("Owner").unwrap();
//! let child = session.new_object("Child").unwrap();
//! session.set(owner, "child", child).unwrap();
//!
//! session.begin().unwrap();
//! let owner_key = session.make_persistent(owner).unwrap();
//! session.commit().unwrap();
//!
//! let child_key = session.key(child).unwrap().unwrap();
//! assert_eq!(child_key.parent(), Some(&owner_key));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cascade;
mod config;
mod embedded;
mod error;
mod field_manager;
mod mapping;
mod metadata;
mod object;
mod registry;
mod relation;
mod session;
mod transaction;
mod translate;

pub use config::{ApiFlavor, MappingConfig};
pub use embedded::EmbeddedFieldManager;
pub use error::{CoreError, CoreResult};
pub use field_manager::FieldManager;
pub use mapping::{MappingKind, RelationEventKind};
pub use metadata::{
    AncestorKind, Cascade, ClassMeta, EmbeddedMeta, FieldKind, FieldMeta, MetadataRegistry,
    NullPolicy, PrimaryKeyKind, RelationMeta, RelationShape, ScalarType,
};
pub use object::{
    wrap_sco_field, EmbeddedObject, FieldValue, Lifecycle, ObjectHandle, ObjectState, ScoList,
};
pub use registry::{KeyRegistry, PendingInsert, PendingInsertId};
pub use relation::{PendingRelationEvent, RelationFieldManager, RelationOutcome};
pub use session::{IdLookup, Session};
pub use transaction::{TransactionBridge, TransactionState};
pub use translate::{
    exception_name, ExceptionTranslatingIterator, FailureObserver, NoopObserver, TranslatedError,
    TranslatedKind,
};
