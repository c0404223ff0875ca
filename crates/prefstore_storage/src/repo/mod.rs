//! Content-addressed repository.
//!
//! A repository is a directory holding a config file, a lock, a blockstore
//! and an ordered datastore whose values are stored as blocks:
//!
//! ```text
//! <repo>/
//! ├─ config              # JSON RepoConfig
//! ├─ repo.lock           # held by FsLocker while open
//! ├─ blocks/<shard>/<sha256 hex>.data
//! └─ datastore/data.log  # key -> block id
//! ```
//!
//! Lifecycle: [`Repo::init`] lays out the directory once, [`Repo::open`]
//! takes the lock and mounts the datastore, [`Repo::close`] releases both.
//! A closed repository can be opened again.

mod blockstore;
mod config;
mod datastore;
mod lock;

pub use blockstore::{Blockstore, Cid};
pub use config::{RepoConfig, RepoInitOptions, BLOCK_HASH, REPO_VERSION};
pub use datastore::RepoDatastore;
pub use lock::{FsLocker, Locker, NoopLocker, RepoLock, LOCK_FILE};

use crate::device::FileDevice;
use crate::error::{StorageError, StorageResult};
use crate::log_store::{LogStore, LogStoreOptions};
use crate::ordered::OrderedStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONFIG_FILE: &str = "config";
const BLOCKS_DIR: &str = "blocks";
const DATASTORE_DIR: &str = "datastore";
const DATASTORE_LOG: &str = "data.log";

/// A content-addressed repository rooted at a directory.
#[derive(Debug)]
pub struct Repo {
    root: PathBuf,
    locker: RwLock<Arc<dyn Locker>>,
    state: Mutex<Option<OpenRepo>>,
}

#[derive(Debug)]
struct OpenRepo {
    lock: Box<dyn RepoLock>,
    config: RepoConfig,
    blocks: Arc<Blockstore>,
    datastore: RepoDatastore,
}

impl Repo {
    /// Creates a closed handle for the repository at `root`, using
    /// [`FsLocker`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locker: RwLock::new(Arc::new(FsLocker)),
            state: Mutex::new(None),
        }
    }

    /// Repository root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Replaces the locker used by later [`open`](Repo::open) calls.
    pub fn install_locker(&self, locker: Arc<dyn Locker>) {
        debug!(root = %self.root.display(), ?locker, "installing repository locker");
        *self.locker.write() = locker;
    }

    /// Returns `true` if the repository directory exists.
    pub async fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Returns `true` if the repository has a valid config.
    pub async fn is_initialized(&self) -> bool {
        RepoConfig::load(&self.config_path()).is_ok()
    }

    /// Lays out an empty repository. Does nothing if a valid config is
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or config cannot be written.
    pub async fn init(&self, options: RepoInitOptions) -> StorageResult<()> {
        let config_path = self.config_path();
        if RepoConfig::load(&config_path).is_ok() {
            return Ok(());
        }

        fs::create_dir_all(self.root.join(BLOCKS_DIR))?;
        fs::create_dir_all(self.root.join(DATASTORE_DIR))?;
        RepoConfig::from_options(&options).save(&config_path)?;
        info!(root = %self.root.display(), "initialized repository");
        Ok(())
    }

    /// Takes the lock and mounts the datastore. Opening an open repository
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] without a valid config,
    /// [`StorageError::Locked`] if another handle holds the lock, or any
    /// error from replaying the datastore.
    pub async fn open(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Ok(());
        }

        let config_path = self.config_path();
        if !config_path.is_file() {
            return Err(StorageError::NotInitialized {
                path: self.root.clone(),
            });
        }
        let config = RepoConfig::load(&config_path)?;

        let locker = Arc::clone(&*self.locker.read());
        let lock = locker.lock(&self.root)?;

        match self.mount(&config) {
            Ok((blocks, datastore)) => {
                info!(root = %self.root.display(), "opened repository");
                *state = Some(OpenRepo {
                    lock,
                    config,
                    blocks,
                    datastore,
                });
                Ok(())
            }
            Err(err) => {
                if let Err(release) = lock.release() {
                    warn!(error = %release, "failed to release repository lock");
                }
                Err(err)
            }
        }
    }

    fn mount(&self, config: &RepoConfig) -> StorageResult<(Arc<Blockstore>, RepoDatastore)> {
        let blocks = Arc::new(Blockstore::open(
            &self.root.join(BLOCKS_DIR),
            config.shard_prefix_len,
            config.sync_on_write,
        )?);
        let device = FileDevice::open(&self.root.join(DATASTORE_DIR).join(DATASTORE_LOG))?;
        let index = LogStore::open(
            Box::new(device),
            LogStoreOptions::default().sync_on_write(config.sync_on_write),
        )?;
        let datastore = RepoDatastore::new(index, Arc::clone(&blocks));
        Ok((blocks, datastore))
    }

    /// Returns `true` unless the repository is open.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().is_none()
    }

    /// Closes the datastore and releases the lock. Closing a closed
    /// repository does nothing.
    ///
    /// # Errors
    ///
    /// Returns the first error from closing the datastore or releasing the
    /// lock; both are attempted.
    pub async fn close(&self) -> StorageResult<()> {
        let open = self.state.lock().take();
        let Some(open) = open else {
            return Ok(());
        };

        let closed = open.datastore.close().await;
        let released = open.lock.release();
        info!(root = %self.root.display(), "closed repository");
        closed.and(released)
    }

    fn with_open<T>(&self, f: impl FnOnce(&OpenRepo) -> T) -> StorageResult<T> {
        self.state.lock().as_ref().map(f).ok_or(StorageError::Closed)
    }

    /// The ordered datastore.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] if the repository is not open.
    pub fn datastore(&self) -> StorageResult<RepoDatastore> {
        self.with_open(|open| open.datastore.clone())
    }

    /// The blockstore.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] if the repository is not open.
    pub fn blocks(&self) -> StorageResult<Arc<Blockstore>> {
        self.with_open(|open| Arc::clone(&open.blocks))
    }

    /// The config the repository was opened with.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] if the repository is not open.
    pub fn config(&self) -> StorageResult<RepoConfig> {
        self.with_open(|open| open.config.clone())
    }

    /// Deletes blocks no datastore key refers to and returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Closed`] if the repository is not open, or
    /// an I/O error.
    pub async fn gc(&self) -> StorageResult<usize> {
        let datastore = self.datastore()?;
        let blocks = self.blocks()?;

        let live: HashSet<Cid> = datastore.referenced().await?.into_iter().collect();
        let mut removed = 0;
        for cid in blocks.list()? {
            if !live.contains(&cid) {
                blocks.delete(&cid)?;
                removed += 1;
            }
        }
        debug!(removed, "collected unreferenced blocks");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_requires_init() {
        let dir = tempdir().unwrap();
        let repo = Repo::new(dir.path().join("repo"));
        assert!(!repo.exists().await);
        assert!(matches!(
            repo.open().await,
            Err(StorageError::NotInitialized { .. })
        ));
        assert!(repo.is_closed());
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let dir = tempdir().unwrap();
        let repo = Repo::new(dir.path().join("repo"));
        repo.init(RepoInitOptions::new().shard_prefix_len(3)).await.unwrap();
        repo.init(RepoInitOptions::new()).await.unwrap();

        repo.open().await.unwrap();
        assert_eq!(repo.config().unwrap().shard_prefix_len, 3);
        repo.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_repo_has_no_datastore() {
        let dir = tempdir().unwrap();
        let repo = Repo::new(dir.path());
        repo.init(RepoInitOptions::default()).await.unwrap();

        assert!(matches!(repo.datastore(), Err(StorageError::Closed)));
        repo.open().await.unwrap();
        repo.open().await.unwrap();
        assert!(repo.datastore().is_ok());

        repo.close().await.unwrap();
        repo.close().await.unwrap();
        assert!(repo.is_closed());
    }

    #[tokio::test]
    async fn gc_removes_unreferenced_blocks() {
        let dir = tempdir().unwrap();
        let repo = Repo::new(dir.path());
        repo.init(RepoInitOptions::default().sync_on_write(false)).await.unwrap();
        repo.open().await.unwrap();

        let store = repo.datastore().unwrap();
        store.put(b"a".to_vec(), Bytes::from("old")).await.unwrap();
        store.put(b"a".to_vec(), Bytes::from("new")).await.unwrap();
        store.put(b"b".to_vec(), Bytes::from("kept")).await.unwrap();

        assert_eq!(repo.gc().await.unwrap(), 1);
        assert_eq!(repo.blocks().unwrap().list().unwrap().len(), 2);
        assert_eq!(store.get(b"a").await.unwrap(), Some(Bytes::from("new")));
        repo.close().await.unwrap();
    }
}
