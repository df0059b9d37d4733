//! Mapping configuration.

use crate::error::{CoreError, CoreResult};

/// The persistence API family whose error vocabulary callers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ApiFlavor {
    /// JDO-style exception names.
    #[default]
    Jdo,
    /// JPA-style exception names.
    Jpa,
}

/// Configuration for a mapping session.
#[derive(Debug, Clone)]
pub struct MappingConfig {
    /// Error vocabulary used when translating store failures.
    pub api: ApiFlavor,

    /// Store property holding the version of versioned classes that do not
    /// name their own column.
    pub version_property: String,

    /// Result limit for the parent-side one-to-one ancestor query.
    pub one_to_one_query_limit: usize,

    /// Whether beginning a logical transaction starts the store transaction
    /// immediately instead of on first store access.
    pub eager_transactions: bool,

    /// Whether writes outside an active logical transaction are allowed.
    pub allow_nontransactional_writes: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            api: ApiFlavor::Jdo,
            version_property: "OPT_VERSION".to_string(),
            one_to_one_query_limit: 2,
            eager_transactions: true,
            allow_nontransactional_writes: true,
        }
    }
}

impl MappingConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the error vocabulary.
    #[must_use]
    pub const fn api(mut self, api: ApiFlavor) -> Self {
        self.api = api;
        self
    }

    /// Sets the default version property name.
    #[must_use]
    pub fn version_property(mut self, name: impl Into<String>) -> Self {
        self.version_property = name.into();
        self
    }

    /// Sets the one-to-one query limit.
    #[must_use]
    pub const fn one_to_one_query_limit(mut self, limit: usize) -> Self {
        self.one_to_one_query_limit = limit;
        self
    }

    /// Sets whether store transactions start eagerly.
    #[must_use]
    pub const fn eager_transactions(mut self, value: bool) -> Self {
        self.eager_transactions = value;
        self
    }

    /// Sets whether writes outside a transaction are allowed.
    #[must_use]
    pub const fn allow_nontransactional_writes(mut self, value: bool) -> Self {
        self.allow_nontransactional_writes = value;
        self
    }

    /// Checks the configuration for values that would hide integrity errors.
    pub fn validate(&self) -> CoreResult<()> {
        if self.one_to_one_query_limit < 2 {
            return Err(CoreError::invalid_operation(format!(
                "one-to-one query limit must be at least 2, got {}",
                self.one_to_one_query_limit
            )));
        }
        if self.version_property.is_empty() {
            return Err(CoreError::invalid_operation(
                "version property name must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = MappingConfig::default();
        assert_eq!(config.api, ApiFlavor::Jdo);
        assert_eq!(config.version_property, "OPT_VERSION");
        assert_eq!(config.one_to_one_query_limit, 2);
        assert!(config.eager_transactions);
        assert!(config.allow_nontransactional_writes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = MappingConfig::new()
            .api(ApiFlavor::Jpa)
            .version_property("rev")
            .eager_transactions(false);

        assert_eq!(config.api, ApiFlavor::Jpa);
        assert_eq!(config.version_property, "rev");
        assert!(!config.eager_transactions);
    }

    #[test]
    fn query_limit_below_two_is_rejected() {
        let config = MappingConfig::new().one_to_one_query_limit(1);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }
}
