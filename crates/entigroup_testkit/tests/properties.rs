//! Property tests over generated keys and values.

use entigroup_codec::{decode_key, encode_key, KeyIdentity, PropertyValue, StoreKey};
use entigroup_core::FieldValue;
use entigroup_storage::{Datastore, Entity};
use entigroup_testkit::prelude::*;
use proptest::prelude::*;

/// Picks the `KitchenSink` field declared with the value's type.
fn sink_field(value: &PropertyValue) -> &'static str {
    match value {
        PropertyValue::Integer(_) => "int",
        PropertyValue::Float(_) => "float",
        PropertyValue::Bool(_) => "flag",
        PropertyValue::Bytes(_) => "bytes",
        PropertyValue::Key(_) => "key",
        _ => "str",
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn encoded_keys_round_trip(key in key_strategy(3)) {
        let encoded = encode_key(&key).unwrap();
        prop_assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        prop_assert_eq!(decode_key(&encoded).unwrap(), key);
    }

    #[test]
    fn find_resolves_encoded_keys(parent in prop::option::of(key_strategy(2)), identity in identity_strategy()) {
        let key = StoreKey::new("Flight", parent, identity).unwrap();
        let test = TestSession::new();
        let mut entity = Entity::from_key(&key);
        entity.set_property("origin", "BOS");
        test.store.put(&mut entity).unwrap();

        let mut reader = test.second_session();
        let flight = reader.find("Flight", encode_key(&key).unwrap()).unwrap();
        prop_assert!(flight.is_some());
        let flight = flight.unwrap();
        prop_assert_eq!(reader.key(flight).unwrap(), Some(key.clone()));
        prop_assert_eq!(reader.get(flight, "origin").unwrap(), FieldValue::from("BOS"));
        prop_assert_eq!(reader.find("Flight", key).unwrap(), Some(flight));
    }

    #[test]
    fn scalar_values_survive_a_store_round_trip(value in scalar_value_strategy()) {
        let mut test = TestSession::new();
        let sink = test.new_object("KitchenSink").unwrap();
        let field = sink_field(&value);
        test.set(sink, field, FieldValue::from(value.clone())).unwrap();
        let key = test.make_persistent(sink).unwrap();

        let mut reader = test.second_session();
        let sink = reader.find("KitchenSink", key).unwrap().unwrap();
        prop_assert_eq!(reader.get(sink, field).unwrap(), FieldValue::from(value));
    }

    #[test]
    fn integer_sets_read_back_sorted_and_unique(numbers in integer_list_strategy()) {
        let mut test = TestSession::new();
        let props = test.new_object("HasMultiValueProps").unwrap();
        let values: Vec<PropertyValue> = numbers.iter().copied().map(PropertyValue::Integer).collect();
        test.set(props, "numbers", values).unwrap();
        let key = test.make_persistent(props).unwrap();

        let mut expected = numbers;
        expected.sort_unstable();
        expected.dedup();
        let expected: Vec<PropertyValue> = expected.into_iter().map(PropertyValue::Integer).collect();

        let mut reader = test.second_session();
        let props = reader.find("HasMultiValueProps", key).unwrap().unwrap();
        prop_assert_eq!(reader.get(props, "numbers").unwrap(), FieldValue::from(expected));
    }

    #[test]
    fn named_roots_are_found_by_name(identity in identity_strategy()) {
        let mut test = TestSession::new();
        let named = test.new_object("HasNamePk").unwrap();
        let name = match &identity {
            KeyIdentity::Name(name) => name.clone(),
            KeyIdentity::Id(id) => format!("n{id}"),
        };
        test.set(named, "name", name.as_str()).unwrap();
        let key = test.make_persistent(named).unwrap();
        prop_assert_eq!(key.name(), Some(name.as_str()));

        let mut reader = test.second_session();
        let found = reader.find("HasNamePk", StoreKey::with_name("HasNamePk", name).unwrap()).unwrap();
        prop_assert!(found.is_some());
    }
}
