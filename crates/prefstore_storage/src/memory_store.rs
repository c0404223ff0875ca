//! In-memory ordered store for tests and ephemeral use.

use crate::error::{StorageError, StorageResult};
use crate::ordered::{Batch, BatchOp, Entry, OrderedStore, Query, QueryCursor};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An ordered store held entirely in memory.
///
/// Clones share the same data, so several handles can stand in for one
/// engine shared by multiple adapters.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use prefstore_storage::{MemoryStore, OrderedStore};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// store.put(b"/app/key".to_vec(), Bytes::from("value")).await.unwrap();
/// assert_eq!(store.get(b"/app/key").await.unwrap(), Some(Bytes::from("value")));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    data: RwLock<BTreeMap<Vec<u8>, Bytes>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    /// Returns `true` if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl OrderedStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.ensure_open()?;
        Ok(self.inner.data.read().get(key).cloned())
    }

    async fn put(&self, key: Vec<u8>, value: Bytes) -> StorageResult<()> {
        self.ensure_open()?;
        self.inner.data.write().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        self.inner.data.write().remove(key);
        Ok(())
    }

    async fn query(&self, query: Query) -> StorageResult<Box<dyn QueryCursor>> {
        self.ensure_open()?;
        let keys: Vec<Vec<u8>> = {
            let data = self.inner.data.read();
            query
                .select(data.range(query.prefix.clone()..))
                .map(|(key, _)| key.clone())
                .collect()
        };

        Ok(Box::new(MemoryCursor {
            store: self.clone(),
            keys: keys.into_iter(),
            keys_only: query.keys_only,
        }))
    }

    async fn commit(&self, batch: Batch) -> StorageResult<()> {
        self.ensure_open()?;
        let mut data = self.inner.data.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

struct MemoryCursor {
    store: MemoryStore,
    keys: std::vec::IntoIter<Vec<u8>>,
    keys_only: bool,
}

#[async_trait]
impl QueryCursor for MemoryCursor {
    async fn next(&mut self) -> StorageResult<Option<Entry>> {
        self.store.ensure_open()?;
        for key in self.keys.by_ref() {
            if self.keys_only {
                if self.store.inner.data.read().contains_key(&key) {
                    return Ok(Some(Entry { key, value: None }));
                }
                continue;
            }
            let value = self.store.inner.data.read().get(&key).cloned();
            if let Some(value) = value {
                return Ok(Some(Entry {
                    key,
                    value: Some(value),
                }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[tokio::test]
    async fn get_put_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get(b"k").await.unwrap(), None);

        store.put(key("k"), Bytes::from("v1")).await.unwrap();
        store.put(key("k"), Bytes::from("v2")).await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), Some(Bytes::from("v2")));

        store.delete(b"k").await.unwrap();
        store.delete(b"k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn query_is_ordered_and_prefixed() {
        let store = MemoryStore::new();
        for k in ["/b/x", "/a/c", "/a/a", "/a/b", "/ab"] {
            store.put(key(k), Bytes::from(k.to_string())).await.unwrap();
        }

        let entries = store
            .query(Query::prefix(key("/a/")))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let keys: Vec<Vec<u8>> = entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![key("/a/a"), key("/a/b"), key("/a/c")]);
        assert_eq!(entries[0].value, Some(Bytes::from("/a/a")));
    }

    #[tokio::test]
    async fn cursor_skips_entries_deleted_mid_scan() {
        let store = MemoryStore::new();
        store.put(key("/p/1"), Bytes::from("1")).await.unwrap();
        store.put(key("/p/2"), Bytes::from("2")).await.unwrap();

        let mut cursor = store.query(Query::prefix(key("/p/"))).await.unwrap();
        store.delete(b"/p/1").await.unwrap();

        let first = cursor.next().await.unwrap().unwrap();
        assert_eq!(first.key, key("/p/2"));
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = store.batch();
        batch
            .put(key("a"), Bytes::from("1"))
            .put(key("b"), Bytes::from("2"))
            .delete(key("a"));
        store.commit(batch).await.unwrap();

        assert_eq!(store.get(b"a").await.unwrap(), None);
        assert_eq!(store.get(b"b").await.unwrap(), Some(Bytes::from("2")));
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.get(b"k").await, Err(StorageError::Closed)));
        assert!(matches!(
            store.put(key("k"), Bytes::new()).await,
            Err(StorageError::Closed)
        ));
    }
}
