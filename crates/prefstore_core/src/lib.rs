//! # prefstore core
//!
//! Async key-value preference storage over interchangeable engines.
//!
//! An application stores [`Value`]s under string keys. A
//! [`StoreAdapter`] maps each key into its engine's native key space under
//! a [`Namespace`] prefix and each value through the binary codec, so any
//! number of stores with distinct names can share one engine without ever
//! seeing each other's entries.
//!
//! ## Backends
//!
//! | Backend | Mount | Driver |
//! |---------|-------|--------|
//! | Content-addressed repository | [`ContentRepoMount`] | `content-repository` |
//! | Log-structured store | [`LogStoreMount`] | `log-store` |
//!
//! [`KvStorage`] wraps whichever one a [`StorageConfig`] selects.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod error;
mod facade;
mod mount;
mod namespace;

pub use adapter::{AdapterState, StoreAdapter};
pub use config::{AdapterConfig, EngineOptions, StorageConfig, DEFAULT_STORE_NAME};
pub use error::{AdapterError, AdapterResult, CallbackError};
pub use facade::{Backend, ContentRepoBackend, KvStorage, LogStoreBackend};
pub use mount::{ContentRepoMount, LogStoreMount, Mount, RepoEngine};
pub use namespace::{normalize_store_name, Namespace};

pub use prefstore_codec::{SharedValue, TypedArray, Value};
