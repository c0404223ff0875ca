//! The user-facing store.

use crate::adapter::{AdapterState, StoreAdapter};
use crate::config::{EngineOptions, StorageConfig};
use crate::error::{AdapterResult, CallbackError};
use crate::mount::{ContentRepoMount, LogStoreMount};
use crate::namespace::Namespace;
use prefstore_codec::Value;

/// Adapter over a content-addressed repository.
pub type ContentRepoBackend = StoreAdapter<ContentRepoMount>;

/// Adapter over a log-structured store.
pub type LogStoreBackend = StoreAdapter<LogStoreMount>;

/// The supported backends.
#[derive(Debug)]
pub enum Backend {
    /// Content-addressed repository.
    ContentRepository(ContentRepoBackend),
    /// Log-structured store.
    LogStore(LogStoreBackend),
}

macro_rules! dispatch {
    ($backend:expr, $adapter:ident => $call:expr) => {
        match $backend {
            Backend::ContentRepository($adapter) => $call,
            Backend::LogStore($adapter) => $call,
        }
    };
}

impl Backend {
    /// Builds the adapter `config` selects.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidConfig`](crate::AdapterError::InvalidConfig)
    /// for an empty store name.
    pub fn new(config: StorageConfig) -> AdapterResult<Self> {
        Ok(match config.engine {
            EngineOptions::ContentRepository(mount) => {
                Self::ContentRepository(StoreAdapter::new(&config.adapter, mount)?)
            }
            EngineOptions::LogStore(mount) => Self::LogStore(StoreAdapter::new(&config.adapter, mount)?),
        })
    }
}

/// A namespaced key-value store over one backend.
///
/// Every method forwards to the backend's adapter.
///
/// # Example
///
/// ```rust
/// use prefstore_core::{EngineOptions, KvStorage, LogStoreMount, StorageConfig, Value};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let config = StorageConfig::new(EngineOptions::LogStore(LogStoreMount::InMemory))
///     .store_name("settings");
/// let storage = KvStorage::open(config).await.unwrap();
///
/// storage.set("theme", "dark").await.unwrap();
/// assert_eq!(storage.get("theme").await.unwrap(), Some(Value::from("dark")));
/// assert_eq!(storage.keys().await.unwrap(), vec!["theme".to_string()]);
/// storage.close().await.unwrap();
/// # });
/// ```
#[derive(Debug)]
pub struct KvStorage {
    backend: Backend,
}

impl KvStorage {
    /// Creates a store. The backend is mounted on first use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error.
    pub fn new(config: StorageConfig) -> AdapterResult<Self> {
        Ok(Self {
            backend: Backend::new(config)?,
        })
    }

    /// Creates a store and mounts its backend.
    ///
    /// # Errors
    ///
    /// Returns a configuration or mount error.
    pub async fn open(config: StorageConfig) -> AdapterResult<Self> {
        let storage = Self::new(config)?;
        storage.ready().await?;
        Ok(storage)
    }

    /// The backend adapter.
    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Waits until the backend is mounted.
    ///
    /// # Errors
    ///
    /// Returns the mount error.
    pub async fn ready(&self) -> AdapterResult<()> {
        dispatch!(&self.backend, a => a.ready().await)
    }

    /// Name of the backend driver.
    #[must_use]
    pub fn driver(&self) -> &'static str {
        dispatch!(&self.backend, a => a.driver())
    }

    /// Lifecycle state of the backend adapter.
    #[must_use]
    pub fn state(&self) -> AdapterState {
        dispatch!(&self.backend, a => a.state())
    }

    /// The key namespace.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        dispatch!(&self.backend, a => a.namespace())
    }

    /// See [`StoreAdapter::has`].
    ///
    /// # Errors
    ///
    /// Returns a backend or decode error.
    pub async fn has(&self, key: &str) -> AdapterResult<bool> {
        dispatch!(&self.backend, a => a.has(key).await)
    }

    /// See [`StoreAdapter::get`].
    ///
    /// # Errors
    ///
    /// Returns a backend or decode error.
    pub async fn get(&self, key: &str) -> AdapterResult<Option<Value>> {
        dispatch!(&self.backend, a => a.get(key).await)
    }

    /// See [`StoreAdapter::set`].
    ///
    /// # Errors
    ///
    /// Returns a backend or encode error.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> AdapterResult<Value> {
        let value = value.into();
        dispatch!(&self.backend, a => a.set(key, value).await)
    }

    /// See [`StoreAdapter::remove`].
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn remove(&self, key: &str) -> AdapterResult<()> {
        dispatch!(&self.backend, a => a.remove(key).await)
    }

    /// See [`StoreAdapter::clear`].
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn clear(&self) -> AdapterResult<()> {
        dispatch!(&self.backend, a => a.clear().await)
    }

    /// See [`StoreAdapter::keys`].
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn keys(&self) -> AdapterResult<Vec<String>> {
        dispatch!(&self.backend, a => a.keys().await)
    }

    /// See [`StoreAdapter::length`].
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn length(&self) -> AdapterResult<usize> {
        dispatch!(&self.backend, a => a.length().await)
    }

    /// See [`StoreAdapter::iterate`].
    ///
    /// # Errors
    ///
    /// Returns the first callback error, a decode error or a backend error.
    pub async fn iterate<F, E>(&self, callback: F) -> AdapterResult<()>
    where
        F: FnMut(Value, String, usize) -> Result<(), E> + Send,
        E: Into<CallbackError>,
    {
        dispatch!(&self.backend, a => a.iterate(callback).await)
    }

    /// See [`StoreAdapter::key_at`].
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn key_at(&self, index: usize) -> AdapterResult<Option<String>> {
        dispatch!(&self.backend, a => a.key_at(index).await)
    }

    /// See [`StoreAdapter::legacy_key_at`].
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    #[deprecated(note = "an empty string is indistinguishable from a miss; use `key_at`")]
    #[allow(deprecated)]
    pub async fn legacy_key_at(&self, index: usize) -> AdapterResult<String> {
        dispatch!(&self.backend, a => a.legacy_key_at(index).await)
    }

    /// Tears down the backend. Calling it again does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to close.
    pub async fn close(&self) -> AdapterResult<()> {
        dispatch!(&self.backend, a => a.teardown().await)
    }
}
