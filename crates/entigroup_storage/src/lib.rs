//! # entigroup storage
//!
//! The datastore contract and an in-memory implementation.
//!
//! A store holds [`Entity`] values under hierarchical keys. Keys that share
//! a root form an *entity group*, and a transaction may only touch one group.
//! The mapping layer in `entigroup_core` is written against the
//! [`Datastore`] trait and never against a concrete store.
//!
//! ## Design Principles
//!
//! - Entities are flat maps of store-native values
//! - Operations join the handle's open transaction, if any
//! - Query cursors may fail on every call, not only when issued
//! - Must be `Send + Sync` so one store can back many sessions
//!
//! ## Example
//!
//! ```rust
//! use entigroup_storage::{Datastore, Entity, InMemoryDatastore, Query};
//!
//! let store = InMemoryDatastore::new();
//! let parent = store.put(&mut Entity::new("Parent")).unwrap();
//! store.put(&mut Entity::with_parent("Child", parent.clone())).unwrap();
//!
//! let mut cursor = store.query(&Query::new("Child").ancestor(parent)).unwrap();
//! assert!(cursor.next_entity().unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod datastore;
mod entity;
mod error;
mod memory;
mod query;

pub use cursor::{EntityCursor, VecCursor};
pub use datastore::{Datastore, TransactionHandle};
pub use entity::Entity;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryDatastore;
pub use query::{PropertyFilter, Query};
