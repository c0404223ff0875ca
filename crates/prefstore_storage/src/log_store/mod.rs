//! Log-structured ordered store.
//!
//! Every write appends one checksummed record to a [`LogDevice`]. An
//! in-memory ordered index maps each live key to the position of its
//! latest value in the log, so reads cost one index lookup and one device
//! read, and range queries walk the index in key order.
//!
//! On open the log is replayed to rebuild the index. A torn tail left by
//! an interrupted append is cut off; a checksum failure anywhere else is
//! fatal.
//!
//! Directory layout for [`LogStore::open_dir`]:
//!
//! ```text
//! <path>/
//! ├─ LOCK        # advisory lock, one store per directory
//! └─ data.log    # record log
//! ```

mod reader;
mod record;

pub use record::{RecordType, LOG_MAGIC, LOG_VERSION};

use crate::device::{FileDevice, LogDevice, MemoryDevice};
use crate::error::{StorageError, StorageResult};
use crate::ordered::{Batch, BatchOp, Entry, OrderedStore, Query, QueryCursor};
use async_trait::async_trait;
use bytes::Bytes;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use reader::RecordReader;
use record::{PayloadOp, HEADER_SIZE};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "data.log";

/// Options for opening a [`LogStore`].
#[derive(Debug, Clone, Copy)]
pub struct LogStoreOptions {
    /// Sync the device after every write (safer but slower).
    pub sync_on_write: bool,

    /// Create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for LogStoreOptions {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            create_if_missing: true,
        }
    }
}

impl LogStoreOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether every write is synced.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets whether a missing directory is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

/// Location of a value inside the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValueRef {
    offset: u64,
    len: usize,
}

type Index = BTreeMap<Vec<u8>, ValueRef>;

/// A log-structured ordered key-value store.
///
/// Cheap to clone; clones share one log and index.
#[derive(Debug, Clone)]
pub struct LogStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    device: Mutex<Box<dyn LogDevice>>,
    index: RwLock<Index>,
    options: LogStoreOptions,
    closed: AtomicBool,
    /// Held for the lifetime of a directory-backed store.
    dir_lock: Mutex<Option<File>>,
}

impl LogStore {
    /// Opens a store over `device`, replaying any records it holds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ChecksumMismatch`] or
    /// [`StorageError::Corrupted`] if a whole record is invalid, or an I/O
    /// error.
    pub fn open(mut device: Box<dyn LogDevice>, options: LogStoreOptions) -> StorageResult<Self> {
        let index = replay(device.as_mut())?;
        Ok(Self::from_parts(device, index, options, None))
    }

    /// Opens or creates a store in the directory at `path`.
    ///
    /// Takes an exclusive advisory lock on the directory until the store is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another store holds the
    /// directory, plus every error of [`LogStore::open`].
    pub fn open_dir(path: &Path, options: LogStoreOptions) -> StorageResult<Self> {
        if !path.is_dir() {
            if !options.create_if_missing {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("log store directory does not exist: {}", path.display()),
                )));
            }
            std::fs::create_dir_all(path)?;
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked { path: lock_path });
        }

        let mut device: Box<dyn LogDevice> = Box::new(FileDevice::open(&path.join(LOG_FILE))?);
        let index = replay(device.as_mut())?;
        info!(path = %path.display(), keys = index.len(), "opened log store");
        Ok(Self::from_parts(device, index, options, Some(lock_file)))
    }

    /// Creates an empty store backed by memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_parts(
            Box::new(MemoryDevice::new()),
            Index::new(),
            LogStoreOptions::default().sync_on_write(false),
            None,
        )
    }

    fn from_parts(
        device: Box<dyn LogDevice>,
        index: Index,
        options: LogStoreOptions,
        dir_lock: Option<File>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                device: Mutex::new(device),
                index: RwLock::new(index),
                options,
                closed: AtomicBool::new(false),
                dir_lock: Mutex::new(dir_lock),
            }),
        }
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.index.read().len()
    }

    /// Returns `true` if no keys are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the record log in bytes, including superseded records.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.inner.device.lock().len()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn read_value(&self, value_ref: ValueRef) -> StorageResult<Bytes> {
        let data = self
            .inner
            .device
            .lock()
            .read_at(value_ref.offset, value_ref.len)?;
        Ok(Bytes::from(data))
    }

    /// Appends one record holding `ops` and applies it to the index.
    fn append(&self, ops: &[BatchOp]) -> StorageResult<()> {
        self.ensure_open()?;
        let (record_type, payload) = record::encode_ops(ops)?;
        let parsed = record::parse_payload(record_type, &payload)?;
        let framed = record::frame(record_type, &payload)?;

        let mut device = self.inner.device.lock();
        let start = device.len();
        let written = match device.append(&framed) {
            Ok(offset) if self.inner.options.sync_on_write => device.sync().map(|()| offset),
            other => other,
        };
        let offset = match written {
            Ok(offset) => offset,
            Err(err) => {
                // an unapplied record must not come back on replay
                if let Err(cut) = device.truncate(start) {
                    warn!(error = %cut, "failed to cut unapplied record");
                }
                return Err(err);
            }
        };

        // index is updated under the device lock so appends apply in log order
        let mut index = self.inner.index.write();
        apply(&mut index, offset, &parsed);
        Ok(())
    }
}

fn apply(index: &mut Index, record_offset: u64, ops: &[PayloadOp<'_>]) {
    let payload_start = record_offset + HEADER_SIZE as u64;
    for op in ops {
        match op.value {
            Some((value_offset, value)) => {
                index.insert(
                    op.key.to_vec(),
                    ValueRef {
                        offset: payload_start + value_offset as u64,
                        len: value.len(),
                    },
                );
            }
            None => {
                index.remove(op.key);
            }
        }
    }
}

fn replay(device: &mut dyn LogDevice) -> StorageResult<Index> {
    let mut index = Index::new();
    let mut records = 0usize;

    let valid_end = {
        let mut reader = RecordReader::new(&*device);
        while let Some(record) = reader.next_record()? {
            let ops = record::parse_payload(record.record_type, &record.payload)?;
            apply(&mut index, record.offset, &ops);
            records += 1;
        }
        reader.position()
    };

    let len = device.len();
    if valid_end < len {
        warn!(
            valid_end,
            discarded = len - valid_end,
            "truncating torn tail of log"
        );
        device.truncate(valid_end)?;
    }

    debug!(records, keys = index.len(), "replayed log");
    Ok(index)
}

#[async_trait]
impl OrderedStore for LogStore {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.ensure_open()?;
        let value_ref = self.inner.index.read().get(key).copied();
        value_ref.map(|r| self.read_value(r)).transpose()
    }

    async fn put(&self, key: Vec<u8>, value: Bytes) -> StorageResult<()> {
        self.append(&[BatchOp::Put { key, value }])
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        if !self.inner.index.read().contains_key(key) {
            return Ok(());
        }
        self.append(&[BatchOp::Delete { key: key.to_vec() }])
    }

    async fn query(&self, query: Query) -> StorageResult<Box<dyn QueryCursor>> {
        self.ensure_open()?;
        let entries: Vec<(Vec<u8>, ValueRef)> = {
            let index = self.inner.index.read();
            query
                .select(index.range(query.prefix.clone()..))
                .map(|(key, value_ref)| (key.clone(), *value_ref))
                .collect()
        };

        Ok(Box::new(LogCursor {
            store: self.clone(),
            entries: entries.into_iter(),
            keys_only: query.keys_only,
        }))
    }

    async fn commit(&self, batch: Batch) -> StorageResult<()> {
        if batch.is_empty() {
            return self.ensure_open();
        }
        self.append(batch.ops())
    }

    async fn close(&self) -> StorageResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.inner.device.lock().sync();
        if let Some(lock_file) = self.inner.dir_lock.lock().take() {
            if let Err(err) = FileExt::unlock(&lock_file) {
                warn!(error = %err, "failed to release log store lock");
            }
        }
        debug!("closed log store");
        result
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Walks a snapshot of index positions. The log is append-only, so a
/// position stays readable after later writes supersede it.
struct LogCursor {
    store: LogStore,
    entries: std::vec::IntoIter<(Vec<u8>, ValueRef)>,
    keys_only: bool,
}

#[async_trait]
impl QueryCursor for LogCursor {
    async fn next(&mut self) -> StorageResult<Option<Entry>> {
        self.store.ensure_open()?;
        let Some((key, value_ref)) = self.entries.next() else {
            return Ok(None);
        };
        let value = if self.keys_only {
            None
        } else {
            Some(self.store.read_value(value_ref)?)
        };
        Ok(Some(Entry { key, value }))
    }
}
