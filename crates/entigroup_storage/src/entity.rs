//! Store entities.

use crate::error::{StoreError, StoreResult};
use entigroup_codec::{KeyIdentity, PropertyValue, StoreKey};
use std::collections::BTreeMap;

/// An entity: a key plus a flat map of named properties.
///
/// A freshly constructed entity may be incomplete, meaning it has a kind
/// and optional parent but no identity yet. The store assigns a numeric
/// id on the first put.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    kind: String,
    parent: Option<StoreKey>,
    identity: Option<KeyIdentity>,
    properties: BTreeMap<String, PropertyValue>,
}

impl Entity {
    /// Creates an incomplete root entity.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parent: None,
            identity: None,
            properties: BTreeMap::new(),
        }
    }

    /// Creates an incomplete entity under `parent`.
    pub fn with_parent(kind: impl Into<String>, parent: StoreKey) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(kind)
        }
    }

    /// Creates an entity whose key will use the given name.
    pub fn with_name(
        kind: impl Into<String>,
        name: impl Into<String>,
        parent: Option<StoreKey>,
    ) -> StoreResult<Self> {
        Ok(Self {
            kind: kind.into(),
            parent,
            identity: Some(KeyIdentity::name(name)?),
            properties: BTreeMap::new(),
        })
    }

    /// Creates an entity that will be stored under exactly `key`.
    pub fn from_key(key: &StoreKey) -> Self {
        Self {
            kind: key.kind().to_string(),
            parent: key.parent().cloned(),
            identity: Some(key.identity().clone()),
            properties: BTreeMap::new(),
        }
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the parent key, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&StoreKey> {
        self.parent.as_ref()
    }

    /// Returns the identity, if assigned.
    #[must_use]
    pub fn identity(&self) -> Option<&KeyIdentity> {
        self.identity.as_ref()
    }

    /// Returns the complete key, or `None` if no identity is assigned yet.
    #[must_use]
    pub fn key(&self) -> Option<StoreKey> {
        let identity = self.identity.clone()?;
        StoreKey::new(self.kind.clone(), self.parent.clone(), identity).ok()
    }

    /// Returns true if the entity has a complete key.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.identity.is_some()
    }

    /// Assigns the identity. Fails if one is already assigned.
    pub fn assign_identity(&mut self, identity: KeyIdentity) -> StoreResult<()> {
        if self.identity.is_some() {
            return Err(StoreError::unsupported("re-keying a complete entity"));
        }
        self.identity = Some(identity);
        Ok(())
    }

    /// Gets a property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Returns true if the property is present (even if null-valued).
    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Sets a property, replacing any previous value.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Removes a property, returning its value.
    pub fn remove_property(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    /// Returns all properties.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    /// Consumes the entity, returning its properties.
    #[must_use]
    pub fn into_properties(self) -> BTreeMap<String, PropertyValue> {
        self.properties
    }
}
