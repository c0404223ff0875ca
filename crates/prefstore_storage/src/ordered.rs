//! The ordered key-value engine contract.
//!
//! Every engine the adapter layer can mount implements [`OrderedStore`]:
//! point reads and writes, prefix range queries through a streaming
//! cursor, atomic batches, and close.
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`get`](OrderedStore::get) | Read one key; a miss is `Ok(None)` |
//! | [`put`](OrderedStore::put) | Write one key, overwriting |
//! | [`delete`](OrderedStore::delete) | Remove one key; absent keys are a no-op |
//! | [`query`](OrderedStore::query) | Stream keys under a prefix in key order |
//! | [`commit`](OrderedStore::commit) | Apply a [`Batch`] atomically |
//! | [`close`](OrderedStore::close) | Release the engine; idempotent |

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// One result of a range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Native key.
    pub key: Vec<u8>,
    /// Stored bytes, or `None` for keys-only queries.
    pub value: Option<Bytes>,
}

/// A prefix range query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Only keys starting with this prefix are returned.
    pub prefix: Vec<u8>,
    /// Skip loading values.
    pub keys_only: bool,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Number of matching entries to skip.
    pub offset: usize,
}

impl Query {
    /// A query for every key under `prefix`.
    #[must_use]
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Sets whether values are loaded.
    #[must_use]
    pub fn keys_only(mut self, value: bool) -> Self {
        self.keys_only = value;
        self
    }

    /// Sets the maximum number of entries.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets how many matching entries to skip.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Applies prefix, offset and limit to keys already in order.
    pub(crate) fn select<'a, V: 'a>(
        &'a self,
        entries: impl Iterator<Item = (&'a Vec<u8>, V)> + 'a,
    ) -> impl Iterator<Item = (&'a Vec<u8>, V)> + 'a {
        entries
            .take_while(move |(key, _)| key.starts_with(&self.prefix))
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
    }
}

/// A single write inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Write `value` under `key`.
    Put {
        /// Native key.
        key: Vec<u8>,
        /// Bytes to store.
        value: Bytes,
    },
    /// Remove `key`.
    Delete {
        /// Native key.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// The key this operation touches.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// An ordered group of writes committed atomically.
///
/// Later operations on the same key win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a write.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Bytes>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queues a removal.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued operations in order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consumes the batch.
    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

impl FromIterator<BatchOp> for Batch {
    fn from_iter<I: IntoIterator<Item = BatchOp>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

/// A streaming cursor over query results.
///
/// Keys are fixed when the query starts; values are read as the cursor
/// advances. Whether a write or delete made after the query started is
/// visible depends on the engine: [`LogStore`](crate::LogStore) and the
/// repository datastore yield each entry as it was when the query
/// started, while [`MemoryStore`](crate::MemoryStore) reads current values
/// and skips entries deleted mid-scan.
#[async_trait]
pub trait QueryCursor: Send {
    /// Returns the next entry, or `None` when exhausted.
    async fn next(&mut self) -> StorageResult<Option<Entry>>;

    /// Drains the cursor.
    async fn try_collect(&mut self) -> StorageResult<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// An ordered key-value engine.
///
/// Engines are `Send + Sync` and accept concurrent calls. A single put,
/// get or delete is atomic, and so is a committed batch: readers observe
/// all of it or none of it.
#[async_trait]
pub trait OrderedStore: Send + Sync {
    /// Reads a key. A miss is `Ok(None)`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Writes a key, overwriting any previous value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn put(&self, key: Vec<u8>, value: Bytes) -> StorageResult<()>;

    /// Removes a key. Removing an absent key succeeds.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Streams entries under a prefix in ascending key order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn query(&self, query: Query) -> StorageResult<Box<dyn QueryCursor>>;

    /// Starts an empty batch for [`commit`](OrderedStore::commit).
    fn batch(&self) -> Batch {
        Batch::new()
    }

    /// Applies every operation in `batch` atomically.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn commit(&self, batch: Batch) -> StorageResult<()>;

    /// Closes the engine. Later calls fail with
    /// [`StorageError::Closed`](crate::StorageError::Closed); closing twice
    /// succeeds.
    async fn close(&self) -> StorageResult<()>;

    /// Returns `true` once [`close`](OrderedStore::close) has run.
    fn is_closed(&self) -> bool;
}

#[async_trait]
impl<T: OrderedStore + ?Sized> OrderedStore for Arc<T> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn put(&self, key: Vec<u8>, value: Bytes) -> StorageResult<()> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        (**self).delete(key).await
    }

    async fn query(&self, query: Query) -> StorageResult<Box<dyn QueryCursor>> {
        (**self).query(query).await
    }

    fn batch(&self) -> Batch {
        (**self).batch()
    }

    async fn commit(&self, batch: Batch) -> StorageResult<()> {
        (**self).commit(batch).await
    }

    async fn close(&self) -> StorageResult<()> {
        (**self).close().await
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}
