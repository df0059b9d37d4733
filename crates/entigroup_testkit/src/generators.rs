//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys and property values that
//! satisfy the store's invariants: kinds and names are non-empty and ids
//! are positive.

use entigroup_codec::{KeyIdentity, PropertyValue, StoreKey};
use proptest::prelude::*;

/// Strategy for generating valid kinds.
pub fn kind_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][A-Za-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating key identities, numeric or named.
pub fn identity_strategy() -> impl Strategy<Value = KeyIdentity> {
    prop_oneof![
        (1i64..=i64::MAX).prop_map(KeyIdentity::Id),
        prop::string::string_regex("[a-zA-Z0-9 ._/-]{1,24}")
            .expect("Invalid regex")
            .prop_map(KeyIdentity::Name),
    ]
}

/// Strategy for generating root keys.
pub fn root_key_strategy() -> impl Strategy<Value = StoreKey> {
    (kind_strategy(), identity_strategy())
        .prop_map(|(kind, identity)| {
            StoreKey::new(kind, None, identity).expect("generated key should be valid")
        })
}

/// Strategy for generating keys with parent chains up to `depth` long.
pub fn key_strategy(depth: usize) -> impl Strategy<Value = StoreKey> {
    (
        root_key_strategy(),
        prop::collection::vec((kind_strategy(), identity_strategy()), 0..=depth),
    )
        .prop_map(|(root, chain)| {
            chain.into_iter().fold(root, |parent, (kind, identity)| {
                StoreKey::new(kind, Some(parent), identity).expect("generated key should be valid")
            })
        })
}

/// Strategy for generating single-valued scalar properties.
pub fn scalar_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        Just(PropertyValue::Null),
        any::<bool>().prop_map(PropertyValue::Bool),
        any::<i64>().prop_map(PropertyValue::Integer),
        (-1.0e12f64..1.0e12).prop_map(PropertyValue::Float),
        ".{0,32}".prop_map(PropertyValue::Text),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(PropertyValue::Bytes),
        root_key_strategy().prop_map(PropertyValue::Key),
    ]
}

/// Strategy for generating lists of integers with duplicates.
pub fn integer_list_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-50i64..50, 0..20)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_keys_are_well_formed(key in key_strategy(3)) {
            prop_assert!(!key.kind().is_empty());
            prop_assert!(key.path().len() <= 4);
            prop_assert!(key.root().is_root());
        }
    }
}
