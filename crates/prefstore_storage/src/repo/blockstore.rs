//! Content-addressed block storage.
//!
//! Each block lives in its own file named by the SHA-256 of its contents:
//!
//! ```text
//! blocks/
//! └─ 3a/
//!    └─ 3a7bd3e2360a3d...data
//! ```
//!
//! Identical contents share one file. Files are written to a temporary
//! name and renamed into place, so a reader never sees a partial block.

use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

const BLOCK_EXT: &str = "data";
const TEMP_EXT: &str = "tmp";

/// Identifier of a block: the SHA-256 digest of its contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid([u8; 32]);

impl Cid {
    /// Length of a block id in bytes.
    pub const LEN: usize = 32;

    /// Computes the id of `data`.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Parses a raw 32-byte id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if `bytes` is not 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| {
            StorageError::corrupted(format!("block id has {} bytes, expected 32", bytes.len()))
        })?;
        Ok(Self(raw))
    }

    /// Parses a hex id.
    fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_bytes(&bytes).ok()
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", &self.to_hex()[..12])
    }
}

/// A directory of content-addressed blocks.
#[derive(Debug)]
pub struct Blockstore {
    root: PathBuf,
    shard_len: usize,
    sync: bool,
    temp_counter: AtomicU64,
}

impl Blockstore {
    /// Opens the block directory at `root`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path, shard_len: usize, sync: bool) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            shard_len: shard_len.clamp(1, 64),
            sync,
            temp_counter: AtomicU64::new(0),
        })
    }

    fn block_path(&self, cid: &Cid) -> PathBuf {
        let name = cid.to_hex();
        self.root
            .join(&name[..self.shard_len])
            .join(format!("{name}.{BLOCK_EXT}"))
    }

    /// Stores `data` and returns its id. Storing existing contents is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the block cannot be written.
    pub fn put(&self, data: &[u8]) -> StorageResult<Cid> {
        let cid = Cid::of(data);
        let path = self.block_path(&cid);
        if path.exists() {
            return Ok(cid);
        }

        let shard = path
            .parent()
            .ok_or_else(|| StorageError::corrupted("block path has no parent"))?;
        fs::create_dir_all(shard)?;

        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp = shard.join(format!("{}.{}.{n}.{TEMP_EXT}", cid.to_hex(), std::process::id()));
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        if self.sync {
            file.sync_all()?;
        }
        drop(file);

        if let Err(err) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        Ok(cid)
    }

    /// Reads a block, verifying its contents against the id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if the file does not hash to
    /// `cid`, or an I/O error.
    pub fn get(&self, cid: &Cid) -> StorageResult<Option<Bytes>> {
        let data = match fs::read(self.block_path(cid)) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if Cid::of(&data) != *cid {
            warn!(%cid, "block contents do not match id");
            return Err(StorageError::corrupted(format!("block {cid} fails verification")));
        }
        Ok(Some(Bytes::from(data)))
    }

    /// Returns `true` if the block is stored.
    #[must_use]
    pub fn has(&self, cid: &Cid) -> bool {
        self.block_path(cid).is_file()
    }

    /// Removes a block. Removing an absent block succeeds.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be removed.
    pub fn delete(&self, cid: &Cid) -> StorageResult<()> {
        match fs::remove_file(self.block_path(cid)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Lists every stored block id. Stray files are ignored.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory cannot be read.
    pub fn list(&self) -> StorageResult<Vec<Cid>> {
        let mut cids = Vec::new();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for block in fs::read_dir(shard.path())? {
                let path = block?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(BLOCK_EXT) {
                    continue;
                }
                if let Some(cid) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(Cid::from_hex)
                {
                    cids.push(cid);
                }
            }
        }
        cids.sort();
        Ok(cids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cid_is_sha256() {
        // sha256("abc")
        assert_eq!(
            Cid::of(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(Cid::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn put_dedupes_and_shards() {
        let dir = tempdir().unwrap();
        let store = Blockstore::open(dir.path(), 2, false).unwrap();

        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list().unwrap(), vec![a]);

        let hex = a.to_hex();
        let expected = dir.path().join(&hex[..2]).join(format!("{hex}.data"));
        assert!(expected.is_file());
    }

    #[test]
    fn get_missing_and_delete() {
        let dir = tempdir().unwrap();
        let store = Blockstore::open(dir.path(), 2, false).unwrap();
        let cid = store.put(b"payload").unwrap();

        assert_eq!(store.get(&cid).unwrap(), Some(Bytes::from_static(b"payload")));
        store.delete(&cid).unwrap();
        store.delete(&cid).unwrap();
        assert!(!store.has(&cid));
        assert_eq!(store.get(&cid).unwrap(), None);
    }

    #[test]
    fn tampered_block_fails_verification() {
        let dir = tempdir().unwrap();
        let store = Blockstore::open(dir.path(), 2, false).unwrap();
        let cid = store.put(b"original").unwrap();

        fs::write(store.block_path(&cid), b"tampered").unwrap();
        assert!(matches!(store.get(&cid), Err(StorageError::Corrupted(_))));
    }
}
