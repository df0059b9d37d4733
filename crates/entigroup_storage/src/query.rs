//! Kind queries, optionally scoped to an ancestor.

use crate::entity::Entity;
use entigroup_codec::{PropertyValue, StoreKey};

/// An equality filter on a single property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    /// Property name.
    pub name: String,
    /// Value the property must equal.
    pub value: PropertyValue,
}

/// A query for entities of one kind.
///
/// When an ancestor is set, only entities whose key chain contains the
/// ancestor match. The ancestor itself matches if it has the queried kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    kind: String,
    ancestor: Option<StoreKey>,
    filters: Vec<PropertyFilter>,
    limit: Option<usize>,
}

impl Query {
    /// Creates a query for all entities of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ancestor: None,
            filters: Vec::new(),
            limit: None,
        }
    }

    /// Restricts the query to descendants of `ancestor`.
    #[must_use]
    pub fn ancestor(mut self, ancestor: StoreKey) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.filters.push(PropertyFilter {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the ancestor, if any.
    #[must_use]
    pub fn ancestor_key(&self) -> Option<&StoreKey> {
        self.ancestor.as_ref()
    }

    /// Returns the result limit, if any.
    #[must_use]
    pub fn result_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Checks whether a stored entity satisfies the query.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        if entity.kind() != self.kind {
            return false;
        }
        if let Some(ancestor) = &self.ancestor {
            match entity.key() {
                Some(key) if ancestor.is_ancestor_of(&key) => {}
                _ => return false,
            }
        }
        self.filters
            .iter()
            .all(|f| entity.property(&f.name) == Some(&f.value))
    }
}
