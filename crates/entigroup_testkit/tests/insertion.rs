//! Inserting objects and their dependent children.

use entigroup_codec::{encode_key, PropertyValue, StoreKey};
use entigroup_core::{CoreError, FieldValue, Lifecycle};
use entigroup_storage::Datastore;
use entigroup_testkit::init_tracing;
use entigroup_testkit::prelude::*;

fn key(test: &TestSession, handle: entigroup_core::ObjectHandle) -> StoreKey {
    test.key(handle).unwrap().expect("object should be stored")
}

#[test]
fn one_to_one_children_are_keyed_under_the_owner() {
    init_tracing();
    let mut test = TestSession::new();
    let owner = test.new_object("HasOneToOne").unwrap();
    let flight = test.new_object("Flight").unwrap();
    let child = test.new_object("HasOneToOneParent").unwrap();
    test.set(owner, "str", "yam").unwrap();
    test.set(flight, "origin", "BOS").unwrap();
    test.set(owner, "flight", flight).unwrap();
    test.set(owner, "has_parent", child).unwrap();

    test.begin().unwrap();
    let owner_key = test.make_persistent(owner).unwrap();
    test.commit().unwrap();

    let flight_key = key(&test, flight);
    let child_key = key(&test, child);
    assert_eq!(owner_key.kind(), "HasOneToOneJDO");
    assert_eq!(flight_key.parent(), Some(&owner_key));
    assert_eq!(child_key.parent(), Some(&owner_key));

    let stored = test.store.get(&owner_key).unwrap();
    assert_eq!(stored.property(FLIGHT_COLUMN), Some(&PropertyValue::Key(flight_key.clone())));
    assert_eq!(stored.property(HAS_PARENT_COLUMN), Some(&PropertyValue::Key(child_key)));
    assert_eq!(
        test.store.get(&flight_key).unwrap().property("OPT_VERSION"),
        Some(&PropertyValue::Integer(1))
    );
    assert_eq!(test.store.entity_count(), 3);
    assert_eq!(test.lifecycle(flight).unwrap(), Lifecycle::Persistent);
}

#[test]
fn encoded_primary_key_is_published_after_insert() {
    let mut test = TestSession::new();
    let flight = test.new_object("Flight").unwrap();
    let key = test.make_persistent(flight).unwrap();

    assert_eq!(
        test.get(flight, "id").unwrap(),
        FieldValue::from(encode_key(&key).unwrap())
    );
    assert_eq!(test.version(flight).unwrap(), Some(1));
}

#[test]
fn child_assigned_to_another_parent_is_rejected_before_any_write() {
    let mut test = TestSession::new();
    let other = test.new_object("HasOneToOnesWithDifferentCascades").unwrap();
    let other_key = test.make_persistent(other).unwrap();

    for field in ["cascade_all", "cascade_persist"] {
        let owner = test.new_object("HasOneToOnesWithDifferentCascades").unwrap();
        let child_class = if field == "cascade_all" {
            "CascadeAllChild"
        } else {
            "CascadePersistChild"
        };
        let child = test.new_object(child_class).unwrap();
        test.set(child, "ancestor_id", encode_key(&other_key).unwrap()).unwrap();
        test.set(owner, field, child).unwrap();

        test.begin().unwrap();
        let err = test.make_persistent(owner).unwrap_err();
        test.rollback().unwrap();

        assert!(matches!(err, CoreError::IllegalArgument { .. }), "{field}: {err}");
        assert!(test.key(owner).unwrap().is_none());
        assert!(test.key(child).unwrap().is_none());
    }
    assert_eq!(test.store.entity_count(), 1);
}

#[test]
fn child_keyed_under_another_parent_is_rejected_before_any_write() {
    let mut test = TestSession::new();
    let other = test.new_object("HasOneToOnesWithDifferentCascades").unwrap();
    let other_key = test.make_persistent(other).unwrap();
    let foreign = encode_key(&other_key.child_with_name("CascadeAllChild", "x").unwrap()).unwrap();

    let owner = test.new_object("HasOneToOnesWithDifferentCascades").unwrap();
    let child = test.new_object("CascadeAllChild").unwrap();
    test.set(child, "id", foreign.as_str()).unwrap();
    test.set(owner, "cascade_all", child).unwrap();

    let err = test.make_persistent(owner).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err}");
    assert_eq!(test.store.entity_count(), 1);
    assert!(test.key(owner).unwrap().is_none());
    assert_eq!(test.lifecycle(owner).unwrap(), Lifecycle::Transient);

    // Same child attached to an owner that is already stored
    let stored = test.new_object("HasOneToOnesWithDifferentCascades").unwrap();
    let stored_key = test.make_persistent(stored).unwrap();
    test.set(stored, "cascade_all", child).unwrap();
    let err = test.make_persistent(stored).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }), "{err}");
    assert_eq!(test.store.entity_count(), 2);
    assert!(test.key(child).unwrap().is_none());
    assert_eq!(
        test.store.get(&stored_key).unwrap().property("cascade_all"),
        Some(&PropertyValue::Null)
    );
}

#[test]
fn persist_only_child_joins_the_owner_group_in_a_transaction() {
    let mut test = TestSession::new();
    let owner = test.new_object("HasOneToOnesWithDifferentCascades").unwrap();
    let child = test.new_object("CascadePersistChild").unwrap();
    test.set(owner, "cascade_persist", child).unwrap();

    test.begin().unwrap();
    let owner_key = test.make_persistent(owner).unwrap();
    test.commit().unwrap();

    let child_key = key(&test, child);
    assert_eq!(child_key.parent(), Some(&owner_key));
    assert_eq!(
        test.get(child, "ancestor_id").unwrap(),
        FieldValue::from(encode_key(&owner_key).unwrap())
    );
    assert_eq!(test.store.entity_count(), 2);
}

#[test]
fn relation_without_persist_cascade_rejects_transient_child() {
    let mut test = TestSession::new();
    let owner = test.new_object("HasOneToOnesWithDifferentCascades").unwrap();
    let child = test.new_object("CascadeRemoveChild").unwrap();
    test.set(owner, "cascade_remove", child).unwrap();

    let err = test.make_persistent(owner).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }));
    assert_eq!(test.store.entity_count(), 0);
}

#[test]
fn persisting_the_child_side_stores_the_owner_first() {
    let mut test = TestSession::new();
    let owner = test.new_object("HasOneToOne").unwrap();
    let child = test.new_object("HasOneToOneParent").unwrap();
    test.set(owner, "has_parent", child).unwrap();
    test.set(child, "parent", owner).unwrap();

    test.begin().unwrap();
    let child_key = test.make_persistent(child).unwrap();
    test.commit().unwrap();

    let owner_key = key(&test, owner);
    assert_eq!(child_key.parent(), Some(&owner_key));
    let stored = test.store.get(&owner_key).unwrap();
    assert_eq!(stored.property(HAS_PARENT_COLUMN), Some(&PropertyValue::Key(child_key)));
    assert_eq!(test.get(owner, "has_parent").unwrap(), FieldValue::Ref(child));
}

#[test]
fn strict_reference_cannot_be_null() {
    let mut test = TestSession::new();
    let owner = test.new_object("HasStrictOneToOne").unwrap();
    let err = test.make_persistent(owner).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }));
}

#[test]
fn strict_reference_to_an_unflushed_child_fails() {
    let mut test = TestSession::new();
    let owner = test.new_object("HasStrictOneToOne").unwrap();
    let child = test.new_object("StrictChild").unwrap();
    test.set(owner, "child", child).unwrap();
    test.set(child, "owner", owner).unwrap();

    let err = test.make_persistent(child).unwrap_err();
    assert!(matches!(err, CoreError::NotYetFlushed { .. }), "{err}");
}

#[test]
fn strict_reference_persists_owner_first() {
    let mut test = TestSession::new();
    let owner = test.new_object("HasStrictOneToOne").unwrap();
    let child = test.new_object("StrictChild").unwrap();
    test.set(owner, "child", child).unwrap();

    let owner_key = test.make_persistent(owner).unwrap();
    assert_eq!(key(&test, child).parent(), Some(&owner_key));
}

#[test]
fn updating_a_stored_owner_inserts_new_children() {
    let mut test = TestSession::new();
    let owner = test.new_object("HasOneToOne").unwrap();
    test.begin().unwrap();
    let owner_key = test.make_persistent(owner).unwrap();
    test.commit().unwrap();

    let flight = test.new_object("Flight").unwrap();
    test.set(owner, "flight", flight).unwrap();
    test.begin().unwrap();
    test.make_persistent(owner).unwrap();
    test.commit().unwrap();

    let flight_key = key(&test, flight);
    assert_eq!(flight_key.parent(), Some(&owner_key));
    assert_eq!(
        test.store.get(&owner_key).unwrap().property(FLIGHT_COLUMN),
        Some(&PropertyValue::Key(flight_key))
    );
}

#[test]
fn explicit_identities_are_used_as_given() {
    let mut test = TestSession::new();

    let long_pk = test.new_object("HasLongPk").unwrap();
    test.set(long_pk, "id", 42i64).unwrap();
    assert_eq!(test.make_persistent(long_pk).unwrap().id(), Some(42));

    let name_pk = test.new_object("HasNamePk").unwrap();
    test.set(name_pk, "name", "yam").unwrap();
    assert_eq!(test.make_persistent(name_pk).unwrap().name(), Some("yam"));

    let unnamed = test.new_object("HasNamePk").unwrap();
    let err = test.make_persistent(unnamed).unwrap_err();
    assert!(matches!(err, CoreError::IllegalArgument { .. }));

    let sink = test.new_object("KitchenSink").unwrap();
    test.set(sink, "id", "named sink!").unwrap();
    assert_eq!(test.make_persistent(sink).unwrap().name(), Some("named sink!"));
}

#[test]
fn ancestor_fields_place_the_entity_in_the_group() {
    let mut test = TestSession::new();
    let flight = test.new_object("Flight").unwrap();
    let flight_key = test.make_persistent(flight).unwrap();
    let encoded = encode_key(&flight_key).unwrap();

    let child = test.new_object("HasAncestor").unwrap();
    test.set(child, "ancestor_id", encoded.as_str()).unwrap();
    let child_key = test.make_persistent(child).unwrap();
    assert_eq!(child_key.parent(), Some(&flight_key));
    assert_eq!(test.get(child, "ancestor_id").unwrap(), FieldValue::from(encoded));

    let keyed = test.new_object("HasKeyAncestor").unwrap();
    test.set(keyed, "parent_key", flight_key.clone()).unwrap();
    let keyed_key = test.make_persistent(keyed).unwrap();
    assert_eq!(keyed_key.parent(), Some(&flight_key));

    let err = test.set(keyed, "parent_key", FieldValue::Null).unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
}
