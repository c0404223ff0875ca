//! Adapter and facade configuration.

use crate::error::AdapterResult;
use crate::mount::{ContentRepoMount, LogStoreMount};
use crate::namespace::Namespace;

/// Store name used when none is given.
pub const DEFAULT_STORE_NAME: &str = "kvstorage";

/// Configuration of one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Logical store name. Normalized into the key prefix.
    pub store_name: String,

    /// Overrides the store name as the source of the key prefix.
    pub namespace_seed: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            store_name: DEFAULT_STORE_NAME.to_string(),
            namespace_seed: None,
        }
    }
}

impl AdapterConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the store name.
    #[must_use]
    pub fn store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = name.into();
        self
    }

    /// Derives the key prefix from `seed` instead of the store name.
    #[must_use]
    pub fn namespace_seed(mut self, seed: impl Into<String>) -> Self {
        self.namespace_seed = Some(seed.into());
        self
    }

    /// The namespace this configuration selects.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidConfig`](crate::AdapterError::InvalidConfig)
    /// if the selected name is empty.
    pub fn namespace(&self) -> AdapterResult<Namespace> {
        Namespace::new(self.namespace_seed.as_deref().unwrap_or(&self.store_name))
    }
}

/// The engine a [`KvStorage`](crate::KvStorage) mounts.
#[derive(Debug, Clone)]
pub enum EngineOptions {
    /// A content-addressed repository.
    ContentRepository(ContentRepoMount),
    /// A log-structured store.
    LogStore(LogStoreMount),
}

/// Configuration of a [`KvStorage`](crate::KvStorage).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Namespace settings.
    pub adapter: AdapterConfig,

    /// Engine to mount.
    pub engine: EngineOptions,
}

impl StorageConfig {
    /// Creates a configuration mounting `engine` with default namespace
    /// settings.
    #[must_use]
    pub fn new(engine: EngineOptions) -> Self {
        Self {
            adapter: AdapterConfig::default(),
            engine,
        }
    }

    /// Sets the store name.
    #[must_use]
    pub fn store_name(mut self, name: impl Into<String>) -> Self {
        self.adapter = self.adapter.store_name(name);
        self
    }

    /// Derives the key prefix from `seed` instead of the store name.
    #[must_use]
    pub fn namespace_seed(mut self, seed: impl Into<String>) -> Self {
        self.adapter = self.adapter.namespace_seed(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_namespace() {
        let ns = AdapterConfig::default().namespace().unwrap();
        assert_eq!(ns.as_str(), "/kvstorage/");
    }

    #[test]
    fn seed_overrides_store_name() {
        let config = AdapterConfig::new()
            .store_name("ignored")
            .namespace_seed("232c preference");
        assert_eq!(config.namespace().unwrap().as_str(), "/232c_preference/");
    }

    #[test]
    fn empty_store_name_is_invalid() {
        assert!(AdapterConfig::new().store_name("").namespace().is_err());
    }
}
