//! The backend adapter.
//!
//! A [`StoreAdapter`] puts one namespace over one ordered engine and
//! speaks [`Value`]s. Keys are mapped through the [`Namespace`], values
//! through the codec.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --first use--> Initializing --mounted--> Ready
//!       ^                            |                     |
//!       +-------mount failed---------+                 teardown
//!                                                          v
//!                                                        Closed
//! ```
//!
//! The first operation mounts the engine. Concurrent first callers share
//! one mount attempt. A failed mount leaves the adapter `Uninitialized`,
//! so the next call tries again. `teardown` moves to `Closed` from any
//! state; every later operation fails with
//! [`AdapterError::ClosedStore`].

use crate::config::AdapterConfig;
use crate::error::{AdapterError, AdapterResult, CallbackError};
use crate::mount::Mount;
use crate::namespace::Namespace;
use parking_lot::RwLock;
use prefstore_codec::{from_bytes, to_bytes, Value};
use prefstore_storage::{Batch, Entry, OrderedStore, Query};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Readiness of a [`StoreAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// No engine yet.
    Uninitialized,
    /// A mount is in flight.
    Initializing,
    /// The engine is mounted.
    Ready,
    /// Torn down. Terminal.
    Closed,
}

/// A namespaced value store over one engine.
pub struct StoreAdapter<M: Mount> {
    mount: M,
    namespace: Namespace,
    state: RwLock<AdapterState>,
    engine: OnceCell<M::Engine>,
}

impl<M: Mount> std::fmt::Debug for StoreAdapter<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("driver", &self.mount.driver())
            .field("namespace", &self.namespace.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl<M: Mount> StoreAdapter<M> {
    /// Creates an adapter. The engine is mounted on first use.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidConfig`] if the configured name is
    /// empty.
    pub fn new(config: &AdapterConfig, mount: M) -> AdapterResult<Self> {
        Ok(Self {
            mount,
            namespace: config.namespace()?,
            state: RwLock::new(AdapterState::Uninitialized),
            engine: OnceCell::new(),
        })
    }

    /// Creates an adapter and mounts its engine.
    ///
    /// # Errors
    ///
    /// Returns any configuration or mount error.
    pub async fn open(config: &AdapterConfig, mount: M) -> AdapterResult<Self> {
        let adapter = Self::new(config, mount)?;
        adapter.ready().await?;
        Ok(adapter)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    /// Name of the mounted backend.
    #[must_use]
    pub fn driver(&self) -> &'static str {
        self.mount.driver()
    }

    /// The adapter's key namespace.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Waits until the engine is mounted.
    ///
    /// # Errors
    ///
    /// Returns the mount error, or [`AdapterError::ClosedStore`] after
    /// teardown.
    pub async fn ready(&self) -> AdapterResult<()> {
        self.engine().await.map(|_| ())
    }

    fn ensure_open(&self) -> AdapterResult<()> {
        if self.state() == AdapterState::Closed {
            return Err(AdapterError::ClosedStore);
        }
        Ok(())
    }

    async fn engine(&self) -> AdapterResult<&M::Engine> {
        self.ensure_open()?;
        if let Some(engine) = self.engine.get() {
            return Ok(engine);
        }

        let engine = self.engine.get_or_try_init(|| self.mount_engine()).await?;
        if self.state() == AdapterState::Closed {
            // teardown ran while the mount was in flight
            if self.mount.owns_engine() {
                if let Err(err) = engine.close().await {
                    warn!(error = %err, "failed to close engine mounted after teardown");
                }
            }
            return Err(AdapterError::ClosedStore);
        }
        Ok(engine)
    }

    async fn mount_engine(&self) -> AdapterResult<M::Engine> {
        {
            let mut state = self.state.write();
            if *state == AdapterState::Closed {
                return Err(AdapterError::ClosedStore);
            }
            *state = AdapterState::Initializing;
        }

        let driver = self.mount.driver();
        debug!(driver, namespace = self.namespace.as_str(), "mounting engine");
        let mounted = self.mount.mount().await;

        let mut state = self.state.write();
        match mounted {
            Ok(engine) => {
                if *state == AdapterState::Initializing {
                    *state = AdapterState::Ready;
                }
                info!(driver, namespace = self.namespace.as_str(), "adapter ready");
                Ok(engine)
            }
            Err(err) => {
                if *state == AdapterState::Initializing {
                    *state = AdapterState::Uninitialized;
                }
                warn!(driver, error = %err, "mount failed");
                Err(err.into())
            }
        }
    }

    fn native_key(&self, key: &str) -> AdapterResult<Vec<u8>> {
        if key.is_empty() {
            return Err(AdapterError::invalid_key("key must not be empty"));
        }
        Ok(self.namespace.encode_key(key))
    }

    fn app_key(&self, native: &[u8]) -> AdapterResult<String> {
        self.namespace
            .decode_key(native)
            .ok_or_else(|| AdapterError::NamespaceMismatch {
                key: String::from_utf8_lossy(native).into_owned(),
            })
    }

    fn decode_entry(key: &str, bytes: &[u8]) -> AdapterResult<Value> {
        from_bytes(bytes).map_err(|source| {
            warn!(key, error = %source, "stored entry does not decode");
            AdapterError::CorruptedEntry {
                key: key.to_string(),
                source,
            }
        })
    }

    /// Returns `true` if `key` holds a non-null value.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn has(&self, key: &str) -> AdapterResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Reads the value under `key`. A missing key and a stored null both
    /// read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::CorruptedEntry`] if the stored bytes do not
    /// decode, or an engine error.
    pub async fn get(&self, key: &str) -> AdapterResult<Option<Value>> {
        self.ensure_open()?;
        let native = self.native_key(key)?;
        let engine = self.engine().await?;
        let Some(bytes) = engine.get(&native).await? else {
            return Ok(None);
        };
        match Self::decode_entry(key, &bytes)? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    /// Stores `value` under `key`, overwriting, and returns it.
    ///
    /// `None` and other absent values are stored as null.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::CyclicValue`] if the value contains a
    /// reference cycle, or an engine error.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> AdapterResult<Value> {
        self.ensure_open()?;
        let value = value.into();
        let native = self.native_key(key)?;
        let bytes = to_bytes(&value)?;
        let engine = self.engine().await?;
        engine.put(native, bytes.into()).await?;
        Ok(value)
    }

    /// Removes `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an engine error.
    pub async fn remove(&self, key: &str) -> AdapterResult<()> {
        self.ensure_open()?;
        let native = self.native_key(key)?;
        let engine = self.engine().await?;
        engine.delete(&native).await?;
        Ok(())
    }

    async fn native_keys(&self) -> AdapterResult<Vec<Vec<u8>>> {
        let engine = self.engine().await?;
        let mut cursor = engine
            .query(Query::prefix(self.namespace.prefix()).keys_only(true))
            .await?;
        let mut keys = Vec::new();
        while let Some(Entry { key, .. }) = cursor.next().await? {
            keys.push(key);
        }
        Ok(keys)
    }

    /// Removes every key in this namespace with one batch. Other
    /// namespaces on the same engine are untouched.
    ///
    /// # Errors
    ///
    /// Returns an engine error; on error nothing is removed.
    pub async fn clear(&self) -> AdapterResult<()> {
        let keys = self.native_keys().await?;
        if keys.is_empty() {
            return Ok(());
        }

        let engine = self.engine().await?;
        let count = keys.len();
        let mut batch = Batch::new();
        for key in keys {
            batch.delete(key);
        }
        engine.commit(batch).await?;
        debug!(namespace = self.namespace.as_str(), count, "cleared namespace");
        Ok(())
    }

    /// Every key in this namespace, in engine order.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::NamespaceMismatch`] if the engine returns a
    /// key outside the namespace, or an engine error.
    pub async fn keys(&self) -> AdapterResult<Vec<String>> {
        self.native_keys()
            .await?
            .iter()
            .map(|native| self.app_key(native))
            .collect()
    }

    /// Number of keys in this namespace.
    ///
    /// # Errors
    ///
    /// Same as [`keys`](Self::keys).
    pub async fn length(&self) -> AdapterResult<usize> {
        Ok(self.keys().await?.len())
    }

    /// Streams every entry as `callback(value, key, index)`, with `index`
    /// counting from 0. Stored nulls are passed as [`Value::Null`].
    ///
    /// # Errors
    ///
    /// The first callback error stops iteration and is returned as
    /// [`AdapterError::Callback`]. Undecodable entries fail with
    /// [`AdapterError::CorruptedEntry`] rather than being skipped.
    pub async fn iterate<F, E>(&self, mut callback: F) -> AdapterResult<()>
    where
        F: FnMut(Value, String, usize) -> Result<(), E> + Send,
        E: Into<CallbackError>,
    {
        let engine = self.engine().await?;
        let mut cursor = engine.query(Query::prefix(self.namespace.prefix())).await?;

        let mut index = 0;
        while let Some(Entry { key, value }) = cursor.next().await? {
            let key = self.app_key(&key)?;
            let value = match value {
                Some(bytes) => Self::decode_entry(&key, &bytes)?,
                None => Value::Null,
            };
            callback(value, key, index).map_err(|err| AdapterError::Callback(err.into()))?;
            index += 1;
        }
        Ok(())
    }

    /// The key at `index` in engine order, or `None` past the end.
    ///
    /// # Errors
    ///
    /// Same as [`keys`](Self::keys).
    pub async fn key_at(&self, index: usize) -> AdapterResult<Option<String>> {
        let engine = self.engine().await?;
        let query = Query::prefix(self.namespace.prefix())
            .keys_only(true)
            .offset(index)
            .limit(1);
        let mut cursor = engine.query(query).await?;
        match cursor.next().await? {
            Some(entry) => self.app_key(&entry.key).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`key_at`](Self::key_at), but returns `""` past the end.
    ///
    /// # Errors
    ///
    /// Same as [`key_at`](Self::key_at).
    #[deprecated(note = "an empty string is indistinguishable from a miss; use `key_at`")]
    pub async fn legacy_key_at(&self, index: usize) -> AdapterResult<String> {
        Ok(self.key_at(index).await?.unwrap_or_default())
    }

    /// Closes the adapter, and its engine if one was mounted and the mount
    /// owns it. A shared engine stays open for its other users. Calling it
    /// again does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the engine fails. The adapter is closed
    /// regardless.
    pub async fn teardown(&self) -> AdapterResult<()> {
        let previous = std::mem::replace(&mut *self.state.write(), AdapterState::Closed);
        if previous == AdapterState::Closed {
            return Ok(());
        }

        match self.engine.get() {
            Some(engine) if self.mount.owns_engine() => {
                engine.close().await.map_err(AdapterError::BackendIo)?;
            }
            Some(_) => debug!(
                namespace = self.namespace.as_str(),
                "leaving shared engine open"
            ),
            None => {}
        }
        info!(
            driver = self.mount.driver(),
            namespace = self.namespace.as_str(),
            "adapter closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::LogStoreMount;
    use async_trait::async_trait;
    use prefstore_storage::{LogStore, MemoryStore, StorageError, StorageResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn adapter(name: &str) -> StoreAdapter<LogStoreMount> {
        StoreAdapter::new(&AdapterConfig::new().store_name(name), LogStoreMount::InMemory).unwrap()
    }

    /// Fails the first `failures` mounts.
    #[derive(Debug)]
    struct FlakyMount {
        failures: usize,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Mount for FlakyMount {
        type Engine = LogStore;

        async fn mount(&self) -> StorageResult<LogStore> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(StorageError::corrupted("mount refused"));
            }
            Ok(LogStore::in_memory())
        }

        fn driver(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn lazy_mount_moves_to_ready() {
        let store = adapter("lazy");
        assert_eq!(store.state(), AdapterState::Uninitialized);
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(store.state(), AdapterState::Ready);
    }

    #[tokio::test]
    async fn failed_mount_can_be_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mount = FlakyMount {
            failures: 1,
            attempts: Arc::clone(&attempts),
        };
        let store = StoreAdapter::new(&AdapterConfig::default(), mount).unwrap();

        assert!(matches!(
            store.ready().await,
            Err(AdapterError::BackendIo(StorageError::Corrupted(_)))
        ));
        assert_eq!(store.state(), AdapterState::Uninitialized);

        store.ready().await.unwrap();
        assert_eq!(store.state(), AdapterState::Ready);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_mount() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mount = FlakyMount {
            failures: 0,
            attempts: Arc::clone(&attempts),
        };
        let store = Arc::new(StoreAdapter::new(&AdapterConfig::default(), mount).unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.set(&format!("k{i}"), i as i64).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(store.length().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn null_reads_as_absent() {
        let store = adapter("nulls");
        store.set("k", Value::Null).await.unwrap();
        store.set("opt", None::<i64>).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.has("opt").await.unwrap());
        assert_eq!(store.length().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let store = adapter("keys");
        assert!(matches!(
            store.set("", 1i64).await,
            Err(AdapterError::InvalidKey { .. })
        ));
        assert!(matches!(
            store.get("").await,
            Err(AdapterError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn teardown_is_terminal_and_idempotent() {
        let store = adapter("closing");
        store.set("k", "v").await.unwrap();

        store.teardown().await.unwrap();
        store.teardown().await.unwrap();
        assert_eq!(store.state(), AdapterState::Closed);
        assert!(matches!(store.get("k").await, Err(AdapterError::ClosedStore)));
        assert!(matches!(store.ready().await, Err(AdapterError::ClosedStore)));
    }

    #[tokio::test]
    async fn closed_store_is_reported_before_argument_errors() {
        let store = adapter("closing");
        store.teardown().await.unwrap();

        let node = prefstore_codec::SharedValue::new(Value::Null);
        node.set(Value::array([Value::Shared(node.clone())]));

        assert!(matches!(store.get("").await, Err(AdapterError::ClosedStore)));
        assert!(matches!(store.has("").await, Err(AdapterError::ClosedStore)));
        assert!(matches!(store.remove("").await, Err(AdapterError::ClosedStore)));
        assert!(matches!(
            store.set("k", Value::Shared(node)).await,
            Err(AdapterError::ClosedStore)
        ));
    }

    #[tokio::test]
    async fn teardown_before_mount_never_mounts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mount = FlakyMount {
            failures: 0,
            attempts: Arc::clone(&attempts),
        };
        let store = StoreAdapter::new(&AdapterConfig::default(), mount).unwrap();

        store.teardown().await.unwrap();
        assert!(matches!(store.keys().await, Err(AdapterError::ClosedStore)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn closed_engine_surfaces_closed_store() {
        let shared = LogStore::in_memory();
        let store = StoreAdapter::open(
            &AdapterConfig::default(),
            LogStoreMount::Shared(shared.clone()),
        )
        .await
        .unwrap();

        shared.close().await.unwrap();
        assert!(matches!(
            store.set("k", 1i64).await,
            Err(AdapterError::ClosedStore)
        ));
    }

    /// Hands out clones of one memory store.
    #[derive(Debug)]
    struct MemoryMount(MemoryStore);

    #[async_trait]
    impl Mount for MemoryMount {
        type Engine = MemoryStore;

        async fn mount(&self) -> StorageResult<MemoryStore> {
            Ok(self.0.clone())
        }

        fn driver(&self) -> &'static str {
            "memory"
        }

        fn owns_engine(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn runs_on_a_memory_engine() {
        let engine = MemoryStore::new();
        let store = StoreAdapter::open(
            &AdapterConfig::new().store_name("mem"),
            MemoryMount(engine.clone()),
        )
        .await
        .unwrap();
        assert_eq!(store.driver(), "memory");

        for key in ["b", "a", "c"] {
            store.set(key, key).await.unwrap();
        }
        store.set("nothing", Value::Null).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(Value::from("a")));
        assert!(!store.has("nothing").await.unwrap());
        assert_eq!(store.keys().await.unwrap(), vec!["a", "b", "c", "nothing"]);
        assert_eq!(store.key_at(2).await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.key_at(4).await.unwrap(), None);

        let mut seen = Vec::new();
        store
            .iterate(|value, key, index| {
                seen.push((key, value, index));
                Ok::<_, std::convert::Infallible>(())
            })
            .await
            .unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[3], ("nothing".to_string(), Value::Null, 3));

        store.clear().await.unwrap();
        assert_eq!(store.length().await.unwrap(), 0);
        assert!(engine.get(b"/mem/a").await.unwrap().is_none());

        store.teardown().await.unwrap();
        assert!(!engine.is_closed());
    }

    #[tokio::test]
    async fn foreign_key_in_range_is_a_mismatch() {
        let store = adapter("ns");
        assert!(matches!(
            store.app_key(b"/other/key"),
            Err(AdapterError::NamespaceMismatch { .. })
        ));
        assert_eq!(store.app_key(b"/ns/key").unwrap(), "key");
    }
}
