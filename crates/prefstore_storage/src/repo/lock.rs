//! Repository lockers.
//!
//! A [`Locker`] guards a repository directory while it is open. The default
//! [`FsLocker`] takes an exclusive advisory lock on `<repo>/repo.lock`.
//! [`NoopLocker`] grants every request, which lets a process reopen a
//! repository whose previous owner never closed it.

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Name of the lock file inside a repository.
pub const LOCK_FILE: &str = "repo.lock";

/// Acquires the lock guarding a repository.
pub trait Locker: Send + Sync + fmt::Debug {
    /// Locks the repository rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if the repository is held elsewhere.
    fn lock(&self, root: &Path) -> StorageResult<Box<dyn RepoLock>>;
}

/// A held repository lock.
pub trait RepoLock: Send + Sync + fmt::Debug {
    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the release fails.
    fn release(self: Box<Self>) -> StorageResult<()>;
}

/// Exclusive advisory file lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLocker;

#[derive(Debug)]
struct FsLock {
    file: File,
}

impl Locker for FsLocker {
    fn lock(&self, root: &Path) -> StorageResult<Box<dyn RepoLock>> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked { path });
        }
        Ok(Box::new(FsLock { file }))
    }
}

impl RepoLock for FsLock {
    fn release(self: Box<Self>) -> StorageResult<()> {
        FileExt::unlock(&self.file)?;
        Ok(())
    }
}

/// A locker that never blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLocker;

#[derive(Debug)]
struct NoopLock;

impl Locker for NoopLocker {
    fn lock(&self, _root: &Path) -> StorageResult<Box<dyn RepoLock>> {
        Ok(Box::new(NoopLock))
    }
}

impl RepoLock for NoopLock {
    fn release(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
