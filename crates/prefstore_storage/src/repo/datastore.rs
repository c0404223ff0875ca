//! The repository's ordered key-value datastore.
//!
//! Keys live in a log-structured index whose values are 32-byte block ids;
//! the values themselves are blocks. Blocks are written before the index
//! entry that names them, so a crash leaves at worst an unreferenced block
//! for [`Repo::gc`](super::Repo::gc) to collect.
//!
//! Query results come back in index order, which today is bytewise. That
//! order is not part of this datastore's contract.

use super::blockstore::{Blockstore, Cid};
use crate::error::{StorageError, StorageResult};
use crate::log_store::LogStore;
use crate::ordered::{Batch, BatchOp, Entry, OrderedStore, Query, QueryCursor};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// Ordered datastore of a [`Repo`](super::Repo).
#[derive(Debug, Clone)]
pub struct RepoDatastore {
    index: LogStore,
    blocks: Arc<Blockstore>,
}

impl RepoDatastore {
    pub(crate) fn new(index: LogStore, blocks: Arc<Blockstore>) -> Self {
        Self { index, blocks }
    }

    /// Block ids referenced by live keys.
    pub(crate) async fn referenced(&self) -> StorageResult<Vec<Cid>> {
        let mut cursor = self.index.query(Query::default()).await?;
        let mut cids = Vec::new();
        while let Some(entry) = cursor.next().await? {
            if let Some(raw) = entry.value {
                cids.push(Cid::from_bytes(&raw)?);
            }
        }
        Ok(cids)
    }

    fn resolve(blocks: &Blockstore, key: &[u8], raw: &[u8]) -> StorageResult<Bytes> {
        let cid = Cid::from_bytes(raw)?;
        blocks.get(&cid)?.ok_or_else(|| {
            warn!(%cid, key = %String::from_utf8_lossy(key), "index names a missing block");
            StorageError::corrupted(format!("block {cid} is missing"))
        })
    }

    fn cid_bytes(cid: Cid) -> Bytes {
        Bytes::copy_from_slice(cid.as_bytes())
    }
}

#[async_trait]
impl OrderedStore for RepoDatastore {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        match self.index.get(key).await? {
            Some(raw) => Self::resolve(&self.blocks, key, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, key: Vec<u8>, value: Bytes) -> StorageResult<()> {
        if self.index.is_closed() {
            return Err(StorageError::Closed);
        }
        let cid = self.blocks.put(&value)?;
        self.index.put(key, Self::cid_bytes(cid)).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.index.delete(key).await
    }

    async fn query(&self, query: Query) -> StorageResult<Box<dyn QueryCursor>> {
        let keys_only = query.keys_only;
        let inner = self.index.query(query.keys_only(false)).await?;
        Ok(Box::new(RepoCursor {
            inner,
            blocks: Arc::clone(&self.blocks),
            keys_only,
        }))
    }

    async fn commit(&self, batch: Batch) -> StorageResult<()> {
        if self.index.is_closed() {
            return Err(StorageError::Closed);
        }
        let mut index_batch = Batch::new();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    let cid = self.blocks.put(&value)?;
                    index_batch.put(key, Self::cid_bytes(cid));
                }
                BatchOp::Delete { key } => {
                    index_batch.delete(key);
                }
            }
        }
        self.index.commit(index_batch).await
    }

    async fn close(&self) -> StorageResult<()> {
        self.index.close().await
    }

    fn is_closed(&self) -> bool {
        self.index.is_closed()
    }
}

struct RepoCursor {
    inner: Box<dyn QueryCursor>,
    blocks: Arc<Blockstore>,
    keys_only: bool,
}

#[async_trait]
impl QueryCursor for RepoCursor {
    async fn next(&mut self) -> StorageResult<Option<Entry>> {
        let Some(entry) = self.inner.next().await? else {
            return Ok(None);
        };
        if self.keys_only {
            return Ok(Some(Entry {
                key: entry.key,
                value: None,
            }));
        }

        let raw = entry
            .value
            .ok_or_else(|| StorageError::corrupted("index entry without block id"))?;
        let value = RepoDatastore::resolve(&self.blocks, &entry.key, &raw)?;
        Ok(Some(Entry {
            key: entry.key,
            value: Some(value),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn datastore(dir: &std::path::Path) -> RepoDatastore {
        let blocks = Arc::new(Blockstore::open(&dir.join("blocks"), 2, false).unwrap());
        RepoDatastore::new(LogStore::in_memory(), blocks)
    }

    #[tokio::test]
    async fn values_round_trip_through_blocks() {
        let dir = tempdir().unwrap();
        let store = datastore(dir.path());

        store.put(b"/a/x".to_vec(), Bytes::from("same")).await.unwrap();
        store.put(b"/a/y".to_vec(), Bytes::from("same")).await.unwrap();

        assert_eq!(store.get(b"/a/x").await.unwrap(), Some(Bytes::from("same")));
        assert_eq!(store.blocks.list().unwrap().len(), 1);
        assert_eq!(store.referenced().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn query_resolves_blocks() {
        let dir = tempdir().unwrap();
        let store = datastore(dir.path());
        let mut batch = store.batch();
        batch.put(b"/q/2".to_vec(), Bytes::from("two")).put(b"/q/1".to_vec(), Bytes::from("one"));
        store.commit(batch).await.unwrap();

        let entries = store
            .query(Query::prefix(b"/q/".to_vec()))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        let one = entries.iter().find(|e| e.key == b"/q/1").unwrap();
        assert_eq!(one.value, Some(Bytes::from("one")));

        let keys = store
            .query(Query::prefix(b"/q/".to_vec()).keys_only(true))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(keys.iter().all(|e| e.value.is_none()));
    }

    #[tokio::test]
    async fn missing_block_is_corruption() {
        let dir = tempdir().unwrap();
        let store = datastore(dir.path());
        store.put(b"k".to_vec(), Bytes::from("v")).await.unwrap();

        let cid = Cid::of(b"v");
        store.blocks.delete(&cid).unwrap();
        assert!(matches!(
            store.get(b"k").await,
            Err(StorageError::Corrupted(_))
        ));
    }
}
