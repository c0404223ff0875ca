//! Append-only byte devices underneath the log store.
//!
//! A device is an opaque, growable byte array. It knows nothing about
//! records or keys; the log store owns all format interpretation.

use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An append-only byte device.
///
/// # Invariants
///
/// - `append` returns the offset where data was written, which is the
///   device length before the call
/// - `read_at` returns exactly the bytes previously appended there
/// - after `sync` returns, appended data survives process termination
pub trait LogDevice: Send + Sync + fmt::Debug {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if the range is not fully
    /// inside the device, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Current length in bytes.
    fn len(&self) -> u64;

    /// Returns `true` if nothing has been appended.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops everything after `new_len`. Used to cut a torn tail.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_len` exceeds the current length or the
    /// truncation fails.
    fn truncate(&mut self, new_len: u64) -> StorageResult<()>;
}

fn check_range(offset: u64, len: usize, size: u64) -> StorageResult<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::ReadPastEnd { offset, len, size }),
    }
}

fn truncate_past_end(new_len: u64, size: u64) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("cannot truncate to {new_len}, device holds {size} bytes"),
    ))
}

/// A device kept in memory.
///
/// Clones share the same buffer, so a test can hand one clone to a log
/// store, drop the store, and reopen from another clone to exercise
/// recovery.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryDevice {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device holding `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the device contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites one byte in place.
    ///
    /// Only for simulating media corruption in tests.
    pub fn corrupt(&self, offset: usize, byte: u8) {
        if let Some(slot) = self.data.write().get_mut(offset) {
            *slot = byte;
        }
    }
}

impl LogDevice for MemoryDevice {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        check_range(offset, len, data.len() as u64)?;
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn len(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_len > size {
            return Err(truncate_past_end(new_len, size));
        }
        data.truncate(new_len as usize);
        Ok(())
    }
}

/// A device backed by a single file.
///
/// `sync` flushes and calls `sync_data`. Reads seek a shared handle, so
/// they are serialized internally.
pub struct FileDevice {
    path: PathBuf,
    file: Mutex<File>,
    len: u64,
}

impl FileDevice {
    /// Opens or creates the file at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for FileDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDevice")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

impl LogDevice for FileDevice {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        check_range(offset, len, self.len)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.len;
        if data.is_empty() {
            return Ok(offset);
        }

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(offset)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.get_mut();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        if new_len > self.len {
            return Err(truncate_past_end(new_len, self.len));
        }
        let file = self.file.get_mut();
        file.set_len(new_len)?;
        file.sync_all()?;
        self.len = new_len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_append_and_read() {
        let mut device = MemoryDevice::new();
        assert!(device.is_empty());

        assert_eq!(device.append(b"hello").unwrap(), 0);
        assert_eq!(device.append(b" world").unwrap(), 5);
        assert_eq!(device.len(), 11);
        assert_eq!(device.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn memory_clones_share_contents() {
        let mut device = MemoryDevice::new();
        let observer = device.clone();
        device.append(b"abc").unwrap();
        assert_eq!(observer.snapshot(), b"abc");

        observer.corrupt(1, b'X');
        assert_eq!(device.read_at(0, 3).unwrap(), b"aXc");
    }

    #[test]
    fn read_past_end_fails() {
        let mut device = MemoryDevice::new();
        device.append(b"hello").unwrap();

        assert!(matches!(
            device.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            device.read_at(u64::MAX, 1),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(device.read_at(5, 0).unwrap().is_empty());
    }

    #[test]
    fn truncate_cuts_tail() {
        let mut device = MemoryDevice::with_data(b"keep-drop".to_vec());
        device.truncate(4).unwrap();
        assert_eq!(device.snapshot(), b"keep");
        assert!(device.truncate(10).is_err());
    }

    #[test]
    fn file_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data.log");

        {
            let mut device = FileDevice::open(&path).unwrap();
            device.append(b"persistent").unwrap();
            device.sync().unwrap();
        }

        let device = FileDevice::open(&path).unwrap();
        assert_eq!(device.len(), 10);
        assert_eq!(device.read_at(0, 10).unwrap(), b"persistent");
        assert_eq!(device.path(), path);
    }

    #[test]
    fn file_truncate_then_append() {
        let dir = tempdir().unwrap();
        let mut device = FileDevice::open(&dir.path().join("data.log")).unwrap();

        device.append(b"abcdef").unwrap();
        device.truncate(3).unwrap();
        assert_eq!(device.append(b"XY").unwrap(), 3);
        assert_eq!(device.read_at(0, 5).unwrap(), b"abcXY");
    }
}
