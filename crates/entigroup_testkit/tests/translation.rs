//! Store failures in the caller's vocabulary.

use entigroup_codec::StoreKey;
use entigroup_core::{
    ApiFlavor, CoreError, MappingConfig, Session, TranslatedKind,
};
use entigroup_storage::{Datastore, Entity, Query};
use entigroup_testkit::init_tracing;
use entigroup_testkit::prelude::*;
use std::error::Error as _;
use std::sync::Arc;

#[test]
fn third_next_failure_is_translated_and_observed_once() {
    init_tracing();
    let store = Arc::new(FlakyDatastore::new(3));
    for origin in ["BOS", "LAX", "MIA"] {
        let mut flight = Entity::new("Flight");
        flight.set_property("origin", origin);
        store.put(&mut flight).unwrap();
    }
    let observer = Arc::new(CountingObserver::default());
    let mut session = Session::new(store, metadata(), MappingConfig::default())
        .unwrap()
        .with_observer(observer.clone());

    let mut results = session.query(&Query::new("Flight")).unwrap();
    assert!(results.next().unwrap().is_ok());
    assert!(results.next().unwrap().is_ok());
    let err = results.next().unwrap().unwrap_err();

    assert_eq!(err.kind(), TranslatedKind::DataStore);
    assert_eq!(err.name(), "JDODataStoreException");
    assert!(err.source().is_some());
    assert_eq!(observer.count(), 1);
}

#[test]
fn failures_while_loading_a_collection_are_translated() {
    let store = Arc::new(FlakyDatastore::new(2));
    let observer = Arc::new(CountingObserver::default());
    let mut session = Session::new(store, metadata(), MappingConfig::default())
        .unwrap()
        .with_observer(observer.clone());

    let owner = session.new_object("HasOneToManyList").unwrap();
    let first = session.new_object("Book").unwrap();
    let second = session.new_object("Book").unwrap();
    session.set(owner, "books", vec![first, second]).unwrap();
    let key = session.make_persistent(owner).unwrap();

    let mut reader = Session::new(session.store().clone(), metadata(), MappingConfig::default())
        .unwrap()
        .with_observer(observer.clone());
    let owner = reader.find("HasOneToManyList", key).unwrap().unwrap();
    let err = reader.get(owner, "books").unwrap_err();
    assert!(matches!(err, CoreError::Translated(_)), "{err}");
    assert_eq!(observer.count(), 1);
}

#[test]
fn jpa_sessions_use_jpa_names() {
    let test = TestSession::with_config(MappingConfig::new().api(ApiFlavor::Jpa));
    let missing = StoreKey::with_id("HasOneToOne", 999).unwrap();
    let child_key = test
        .store
        .put(&mut Entity::with_parent("HasOneToOneParent", missing))
        .unwrap();

    let mut reader = test.second_session();
    let child = reader.find("HasOneToOneParent", child_key).unwrap().unwrap();
    let err = reader.get(child, "parent").unwrap_err();

    let CoreError::Translated(translated) = err else {
        panic!("expected a translated error, got {err}");
    };
    assert_eq!(translated.kind(), TranslatedKind::ObjectNotFound);
    assert!(translated.to_string().starts_with("EntityNotFoundException: "));
}

#[test]
fn unsupported_store_operations_are_translated() {
    let mut test = TestSession::new();
    test.begin().unwrap();
    let err = test.query(&Query::new("Flight")).unwrap_err();
    test.rollback().unwrap();

    let CoreError::Translated(translated) = err else {
        panic!("expected a translated error, got {err}");
    };
    assert_eq!(translated.kind(), TranslatedKind::Unsupported);
    assert_eq!(translated.name(), "JDOUnsupportedOptionException");
}
