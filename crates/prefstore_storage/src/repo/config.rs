//! Repository config file.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Current on-disk repository layout version.
pub const REPO_VERSION: u32 = 1;

/// The only supported block hash.
pub const BLOCK_HASH: &str = "sha2-256";

const CONFIG_TEMP: &str = "config.tmp";

/// Persisted repository settings, stored as JSON in `<repo>/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Layout version the repository was created with.
    pub version: u32,
    /// Hash used to address blocks.
    pub block_hash: String,
    /// Hex characters of a block id used as its shard directory name.
    pub shard_prefix_len: usize,
    /// Sync block and datastore writes before returning.
    pub sync_on_write: bool,
}

impl RepoConfig {
    pub(crate) fn from_options(options: &RepoInitOptions) -> Self {
        Self {
            version: REPO_VERSION,
            block_hash: BLOCK_HASH.to_string(),
            shard_prefix_len: options.shard_prefix_len,
            sync_on_write: options.sync_on_write,
        }
    }

    /// Reads and validates the config at `path`.
    pub(crate) fn load(path: &Path) -> StorageResult<Self> {
        let data = fs::read(path)?;
        let config: Self = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> StorageResult<()> {
        if self.version > REPO_VERSION {
            return Err(StorageError::corrupted(format!(
                "repository version {} is newer than supported {REPO_VERSION}",
                self.version
            )));
        }
        if self.block_hash != BLOCK_HASH {
            return Err(StorageError::corrupted(format!(
                "unsupported block hash {}",
                self.block_hash
            )));
        }
        if !(1..=8).contains(&self.shard_prefix_len) {
            return Err(StorageError::corrupted(format!(
                "shard prefix length {} out of range",
                self.shard_prefix_len
            )));
        }
        Ok(())
    }

    /// Writes the config atomically: temp file, sync, rename.
    pub(crate) fn save(&self, path: &Path) -> StorageResult<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let temp = path.with_file_name(CONFIG_TEMP);

        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, path)?;
        Ok(())
    }
}

/// Options for [`Repo::init`](super::Repo::init).
#[derive(Debug, Clone, Copy)]
pub struct RepoInitOptions {
    /// Hex characters of a block id used as its shard directory name.
    pub shard_prefix_len: usize,
    /// Sync every write before returning.
    pub sync_on_write: bool,
}

impl Default for RepoInitOptions {
    fn default() -> Self {
        Self {
            shard_prefix_len: 2,
            sync_on_write: true,
        }
    }
}

impl RepoInitOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shard directory prefix length (1 to 8 hex characters).
    #[must_use]
    pub const fn shard_prefix_len(mut self, len: usize) -> Self {
        self.shard_prefix_len = len;
        self
    }

    /// Sets whether writes are synced.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config");
        let config = RepoConfig::from_options(&RepoInitOptions::new().shard_prefix_len(3));

        config.save(&path).unwrap();
        assert_eq!(RepoConfig::load(&path).unwrap(), config);
        assert!(!dir.path().join(CONFIG_TEMP).exists());
    }

    #[test]
    fn garbage_config_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            RepoConfig::load(&path),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unknown_hash_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config");
        let mut config = RepoConfig::from_options(&RepoInitOptions::default());
        config.block_hash = "md5".to_string();
        config.save(&path).unwrap();
        assert!(matches!(
            RepoConfig::load(&path),
            Err(StorageError::Corrupted(_))
        ));
    }
}
