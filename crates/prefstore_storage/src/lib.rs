//! # prefstore storage
//!
//! Ordered key-value engines underneath the prefstore adapters.
//!
//! Engines store opaque keys and values. They know nothing about
//! namespaces or the value codec; the adapter layer owns both.
//!
//! ## Engines
//!
//! - [`LogStore`] - append-only record log over a [`LogDevice`] with an
//!   in-memory ordered index and crash recovery
//! - [`Repo`] - content-addressed repository whose [`RepoDatastore`] keeps
//!   values as SHA-256 addressed blocks
//! - [`MemoryStore`] - for tests and ephemeral storage
//!
//! All of them implement [`OrderedStore`].
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use prefstore_storage::{LogStore, OrderedStore, Query};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = LogStore::in_memory();
//! store.put(b"/app/a".to_vec(), Bytes::from("1")).await.unwrap();
//! store.put(b"/app/b".to_vec(), Bytes::from("2")).await.unwrap();
//!
//! let entries = store
//!     .query(Query::prefix(b"/app/".to_vec()).keys_only(true))
//!     .await
//!     .unwrap()
//!     .try_collect()
//!     .await
//!     .unwrap();
//! assert_eq!(entries.len(), 2);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod device;
mod error;
mod log_store;
mod memory_store;
mod ordered;
pub mod repo;

pub use device::{FileDevice, LogDevice, MemoryDevice};
pub use error::{StorageError, StorageResult};
pub use log_store::{LogStore, LogStoreOptions, RecordType, LOG_MAGIC, LOG_VERSION};
pub use memory_store::MemoryStore;
pub use ordered::{Batch, BatchOp, Entry, OrderedStore, Query, QueryCursor};
pub use repo::{
    Blockstore, Cid, FsLocker, Locker, NoopLocker, Repo, RepoConfig, RepoDatastore,
    RepoInitOptions, RepoLock,
};
