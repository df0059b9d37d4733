//! Logical transactions over store transactions.

use entigroup_core::{CoreError, MappingConfig, TransactionState, TranslatedKind};
use entigroup_storage::Datastore;
use entigroup_testkit::prelude::*;

#[test]
fn empty_transaction_leaves_nothing_open() {
    let mut test = TestSession::new();
    test.begin().unwrap();
    assert!(test.store.current_transaction().is_some());
    test.commit().unwrap();

    assert!(test.store.current_transaction().is_none());
    assert_eq!(test.transaction_state(), TransactionState::Committed);
}

#[test]
fn lazy_start_waits_for_first_store_access() {
    let mut test = TestSession::with_config(MappingConfig::new().eager_transactions(false));
    test.begin().unwrap();
    assert!(test.store.current_transaction().is_none());

    let flight = test.new_object("Flight").unwrap();
    test.make_persistent(flight).unwrap();
    assert!(test.store.current_transaction().is_some());
    test.commit().unwrap();
    assert!(test.store.current_transaction().is_none());
    assert_eq!(test.store.entity_count(), 1);
}

#[test]
fn rollback_discards_the_entity_group() {
    let mut test = TestSession::new();
    let owner = test.new_object("HasOneToOne").unwrap();
    let flight = test.new_object("Flight").unwrap();
    test.set(owner, "flight", flight).unwrap();

    test.begin().unwrap();
    test.make_persistent(owner).unwrap();
    test.rollback().unwrap();

    assert_eq!(test.store.entity_count(), 0);
    assert!(test.store.current_transaction().is_none());
    assert_eq!(test.transaction_state(), TransactionState::RolledBack);
}

#[test]
fn second_entity_group_in_one_transaction_is_a_datastore_error() {
    let mut test = TestSession::new();
    let first = test.new_object("Flight").unwrap();
    let second = test.new_object("Flight").unwrap();

    test.begin().unwrap();
    test.make_persistent(first).unwrap();
    let err = test.make_persistent(second).unwrap_err();
    test.rollback().unwrap();

    let CoreError::Translated(translated) = err else {
        panic!("expected a translated error, got {err}");
    };
    assert_eq!(translated.kind(), TranslatedKind::DataStore);
    assert_eq!(translated.name(), "JDODataStoreException");
}

#[test]
fn losing_commit_is_a_retryable_optimistic_failure() {
    let mut test = TestSession::new();
    let flight = test.new_object("Flight").unwrap();
    let key = test.make_persistent(flight).unwrap();

    let mut other = test.second_session();
    other.begin().unwrap();
    let theirs = other.find("Flight", key.clone()).unwrap().unwrap();
    other.set(theirs, "origin", "LAX").unwrap();
    other.make_persistent(theirs).unwrap();

    test.begin().unwrap();
    test.set(flight, "origin", "BOS").unwrap();
    test.make_persistent(flight).unwrap();
    test.commit().unwrap();

    let err = other.commit().unwrap_err();
    let CoreError::Translated(translated) = err else {
        panic!("expected a translated error, got {err}");
    };
    assert_eq!(translated.kind(), TranslatedKind::Optimistic);
    assert_eq!(translated.name(), "JDOOptimisticVerificationException");
    assert!(translated.is_retryable());
    assert_eq!(other.transaction_state(), TransactionState::RolledBack);
    assert!(other.store().current_transaction().is_none());
}

#[test]
fn strict_configuration_requires_a_transaction_for_writes() {
    let mut test =
        TestSession::with_config(MappingConfig::new().allow_nontransactional_writes(false));
    let flight = test.new_object("Flight").unwrap();

    let err = test.make_persistent(flight).unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));

    test.begin().unwrap();
    test.make_persistent(flight).unwrap();
    test.commit().unwrap();
    assert_eq!(test.store.entity_count(), 1);
}

#[test]
fn stray_commit_is_rejected() {
    let mut test = TestSession::new();
    assert!(matches!(test.commit(), Err(CoreError::InvalidOperation { .. })));
    test.begin().unwrap();
    assert!(test.begin().is_err());
    test.rollback().unwrap();
}

#[test]
fn stray_rollback_keeps_loaded_objects() {
    let mut test = TestSession::new();
    let flight = test.new_object("Flight").unwrap();
    let key = test.make_persistent(flight).unwrap();

    assert!(matches!(test.rollback(), Err(CoreError::InvalidOperation { .. })));
    assert_eq!(test.find("Flight", key).unwrap(), Some(flight));
}
