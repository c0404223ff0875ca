//! Engine mounting.
//!
//! A [`Mount`] knows how to produce a ready engine for one backend. The
//! adapter calls it exactly once, on first use.

use async_trait::async_trait;
use bytes::Bytes;
use prefstore_storage::{
    Batch, LogStore, LogStoreOptions, NoopLocker, OrderedStore, Query, QueryCursor, Repo,
    RepoDatastore, RepoInitOptions, StorageResult,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Produces the engine an adapter runs on.
#[async_trait]
pub trait Mount: Send + Sync + fmt::Debug {
    /// The mounted engine.
    type Engine: OrderedStore + 'static;

    /// Opens the engine.
    async fn mount(&self) -> StorageResult<Self::Engine>;

    /// Backend name reported by the adapter.
    fn driver(&self) -> &'static str;

    /// Whether the adapter owns the engine it mounted and closes it on
    /// teardown. Handles supplied by the caller stay open for the caller
    /// and any other adapter sharing them.
    fn owns_engine(&self) -> bool {
        true
    }
}

/// Mounts a [`LogStore`].
#[derive(Debug, Clone)]
pub enum LogStoreMount {
    /// Open or create a store in a directory.
    Dir {
        /// Store directory.
        path: PathBuf,
        /// Open options.
        options: LogStoreOptions,
    },
    /// A fresh store in memory.
    InMemory,
    /// An already open store, possibly shared with other adapters. Teardown
    /// leaves it open.
    Shared(LogStore),
}

impl LogStoreMount {
    /// Mounts the directory at `path` with default options.
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self::Dir {
            path: path.into(),
            options: LogStoreOptions::default(),
        }
    }
}

#[async_trait]
impl Mount for LogStoreMount {
    type Engine = LogStore;

    async fn mount(&self) -> StorageResult<LogStore> {
        match self {
            Self::Dir { path, options } => LogStore::open_dir(path, *options),
            Self::InMemory => Ok(LogStore::in_memory()),
            Self::Shared(store) => Ok(store.clone()),
        }
    }

    fn driver(&self) -> &'static str {
        "log-store"
    }

    fn owns_engine(&self) -> bool {
        !matches!(self, Self::Shared(_))
    }
}

/// Mounts the datastore of a content-addressed [`Repo`].
///
/// The repository is initialized if needed and opened with a
/// [`NoopLocker`], so a lock left behind by a process that never closed
/// the repository does not block it.
#[derive(Debug, Clone)]
pub enum ContentRepoMount {
    /// A repository at a path.
    Path(PathBuf),
    /// An existing repository handle. Teardown leaves it open.
    Existing(Arc<Repo>),
}

impl ContentRepoMount {
    /// Mounts the repository at `path`.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }
}

#[async_trait]
impl Mount for ContentRepoMount {
    type Engine = RepoEngine;

    async fn mount(&self) -> StorageResult<RepoEngine> {
        let repo = match self {
            Self::Path(path) => Arc::new(Repo::new(path.clone())),
            Self::Existing(repo) => Arc::clone(repo),
        };

        if !repo.exists().await || !repo.is_initialized().await {
            repo.init(RepoInitOptions::default()).await?;
        }
        repo.install_locker(Arc::new(NoopLocker));
        if repo.is_closed() {
            repo.open().await?;
        }

        debug!(root = %repo.path().display(), "mounted repository datastore");
        let datastore = repo.datastore()?;
        Ok(RepoEngine { repo, datastore })
    }

    fn driver(&self) -> &'static str {
        "content-repository"
    }

    fn owns_engine(&self) -> bool {
        matches!(self, Self::Path(_))
    }
}

/// A repository datastore whose close also closes the repository.
#[derive(Debug, Clone)]
pub struct RepoEngine {
    repo: Arc<Repo>,
    datastore: RepoDatastore,
}

impl RepoEngine {
    /// The underlying repository.
    #[must_use]
    pub fn repo(&self) -> &Arc<Repo> {
        &self.repo
    }
}

#[async_trait]
impl OrderedStore for RepoEngine {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.datastore.get(key).await
    }

    async fn put(&self, key: Vec<u8>, value: Bytes) -> StorageResult<()> {
        self.datastore.put(key, value).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.datastore.delete(key).await
    }

    async fn query(&self, query: Query) -> StorageResult<Box<dyn QueryCursor>> {
        self.datastore.query(query).await
    }

    async fn commit(&self, batch: Batch) -> StorageResult<()> {
        self.datastore.commit(batch).await
    }

    async fn close(&self) -> StorageResult<()> {
        self.datastore.close().await?;
        self.repo.close().await
    }

    fn is_closed(&self) -> bool {
        self.datastore.is_closed()
    }
}
