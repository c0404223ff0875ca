//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a log device.
    #[error("read beyond end of device: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current device size.
        size: u64,
    },

    /// Persisted data is structurally invalid.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A log record failed its integrity check.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// The store has been closed.
    #[error("storage is closed")]
    Closed,

    /// Another handle holds the lock on this path.
    #[error("locked: {} is held by another handle", path.display())]
    Locked {
        /// The locked path.
        path: PathBuf,
    },

    /// The repository has no valid config.
    #[error("repository not initialized: {}", path.display())]
    NotInitialized {
        /// Repository root.
        path: PathBuf,
    },

    /// The repository config could not be read or written.
    #[error("invalid repository config: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
