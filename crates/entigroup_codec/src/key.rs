//! Hierarchical store keys.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity component of a key: a numeric id or a string name.
///
/// The two are mutually exclusive. Numeric ids are positive; names are
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyIdentity {
    /// Store-assigned or application-supplied numeric id.
    Id(i64),
    /// Application-supplied key name.
    Name(String),
}

impl KeyIdentity {
    /// Builds an identity from optional parts, rejecting ambiguous input.
    pub fn from_parts(id: Option<i64>, name: Option<&str>) -> CodecResult<Self> {
        match (id, name) {
            (Some(_), Some(_)) => Err(CodecError::invalid_identity(
                "a key cannot have both a numeric id and a name",
            )),
            (None, None) => Err(CodecError::invalid_identity(
                "a key needs either a numeric id or a name",
            )),
            (Some(id), None) => Self::id(id),
            (None, Some(name)) => Self::name(name),
        }
    }

    /// Builds a numeric identity.
    pub fn id(id: i64) -> CodecResult<Self> {
        if id <= 0 {
            return Err(CodecError::invalid_identity(format!(
                "numeric id must be positive, got {id}"
            )));
        }
        Ok(Self::Id(id))
    }

    /// Builds a named identity.
    pub fn name(name: impl Into<String>) -> CodecResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CodecError::invalid_identity("key name must not be empty"));
        }
        Ok(Self::Name(name))
    }

    pub(crate) fn validate(&self) -> CodecResult<()> {
        match self {
            Self::Id(id) => Self::id(*id).map(|_| ()),
            Self::Name(name) if name.is_empty() => {
                Err(CodecError::invalid_identity("key name must not be empty"))
            }
            Self::Name(_) => Ok(()),
        }
    }
}

impl fmt::Display for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// A complete, immutable key in the store.
///
/// A key with a parent forms a chain up to a root key. The root of that
/// chain identifies the entity group the key belongs to.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    kind: String,
    parent: Option<Box<StoreKey>>,
    identity: KeyIdentity,
}

impl StoreKey {
    /// Creates a key, validating the kind and identity.
    pub fn new(
        kind: impl Into<String>,
        parent: Option<StoreKey>,
        identity: KeyIdentity,
    ) -> CodecResult<Self> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(CodecError::invalid_identity("key kind must not be empty"));
        }
        identity.validate()?;
        Ok(Self {
            kind,
            parent: parent.map(Box::new),
            identity,
        })
    }

    /// Creates a key from optional id and name, failing if both or neither are given.
    pub fn from_parts(
        kind: impl Into<String>,
        parent: Option<StoreKey>,
        id: Option<i64>,
        name: Option<&str>,
    ) -> CodecResult<Self> {
        Self::new(kind, parent, KeyIdentity::from_parts(id, name)?)
    }

    /// Creates a root key with a numeric id.
    pub fn with_id(kind: impl Into<String>, id: i64) -> CodecResult<Self> {
        Self::new(kind, None, KeyIdentity::id(id)?)
    }

    /// Creates a root key with a name.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> CodecResult<Self> {
        Self::new(kind, None, KeyIdentity::name(name)?)
    }

    /// Creates a child of this key with a numeric id.
    pub fn child_with_id(&self, kind: impl Into<String>, id: i64) -> CodecResult<Self> {
        Self::new(kind, Some(self.clone()), KeyIdentity::id(id)?)
    }

    /// Creates a child of this key with a name.
    pub fn child_with_name(
        &self,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> CodecResult<Self> {
        Self::new(kind, Some(self.clone()), KeyIdentity::name(name)?)
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the parent key, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&StoreKey> {
        self.parent.as_deref()
    }

    /// Returns the identity.
    #[must_use]
    pub fn identity(&self) -> &KeyIdentity {
        &self.identity
    }

    /// Returns the numeric id, if this key has one.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        match self.identity {
            KeyIdentity::Id(id) => Some(id),
            KeyIdentity::Name(_) => None,
        }
    }

    /// Returns the name, if this key has one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.identity {
            KeyIdentity::Name(name) => Some(name),
            KeyIdentity::Id(_) => None,
        }
    }

    /// Returns true if this key has no parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns the root of this key's chain, which names its entity group.
    #[must_use]
    pub fn root(&self) -> &StoreKey {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Returns true if `self` is `other` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &StoreKey) -> bool {
        let mut current = Some(other);
        while let Some(key) = current {
            if key == self {
                return true;
            }
            current = key.parent();
        }
        false
    }

    /// Returns the key chain from the root down to this key.
    #[must_use]
    pub fn path(&self) -> Vec<&StoreKey> {
        let mut path = Vec::new();
        let mut current = Some(self);
        while let Some(key) = current {
            path.push(key);
            current = key.parent();
        }
        path.reverse();
        path
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({self})")
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent}/")?;
        }
        write!(f, "{}({})", self.kind, self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_and_name_are_mutually_exclusive() {
        let err = StoreKey::from_parts("Flight", None, Some(3), Some("foo")).unwrap_err();
        assert!(matches!(err, CodecError::InvalidIdentity { .. }));

        let err = StoreKey::from_parts("Flight", None, None, None).unwrap_err();
        assert!(matches!(err, CodecError::InvalidIdentity { .. }));
    }

    #[test]
    fn rejects_non_positive_ids_and_empty_names() {
        assert!(StoreKey::with_id("Flight", 0).is_err());
        assert!(StoreKey::with_id("Flight", -1).is_err());
        assert!(StoreKey::with_name("Flight", "").is_err());
        assert!(StoreKey::with_id("", 1).is_err());
    }

    #[test]
    fn root_and_ancestry() {
        let root = StoreKey::with_id("Parent", 1).unwrap();
        let child = root.child_with_name("Child", "c").unwrap();
        let grandchild = child.child_with_id("Leaf", 9).unwrap();

        assert!(root.is_root());
        assert_eq!(grandchild.root(), &root);
        assert_eq!(grandchild.parent(), Some(&child));
        assert!(root.is_ancestor_of(&grandchild));
        assert!(!grandchild.is_ancestor_of(&root));
        assert_eq!(grandchild.path(), vec![&root, &child, &grandchild]);
    }

    #[test]
    fn display_shows_chain() {
        let root = StoreKey::with_id("Parent", 1).unwrap();
        let child = root.child_with_name("Child", "c").unwrap();
        assert_eq!(child.to_string(), "Parent(1)/Child(\"c\")");
    }
}
