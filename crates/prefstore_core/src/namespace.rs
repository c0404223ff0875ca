//! Namespace key codec.
//!
//! An adapter owns every native key that starts with its prefix,
//! `"/" + normalized store name + "/"`. Normalization maps each character
//! outside `[A-Za-z0-9_]` to `_`, so a normalized name never contains `/`
//! and no prefix can be a proper prefix of another. Adapters with distinct
//! prefixes therefore never see each other's entries, even when they share
//! one engine.

use crate::error::{AdapterError, AdapterResult};

/// Maps every character that is not ASCII alphanumeric or `_` to `_`.
///
/// Idempotent: normalizing a normalized name returns it unchanged.
#[must_use]
pub fn normalize_store_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// The key space of one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    /// Builds the namespace for `store_name`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidConfig`] if the name is empty.
    pub fn new(store_name: &str) -> AdapterResult<Self> {
        let normalized = normalize_store_name(store_name);
        if normalized.is_empty() {
            return Err(AdapterError::invalid_config("store name must not be empty"));
        }
        Ok(Self {
            prefix: format!("/{normalized}/"),
        })
    }

    /// The prefix as a string, e.g. `"/kvstorage/"`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    /// The prefix bytes, for range queries.
    #[must_use]
    pub fn prefix(&self) -> &[u8] {
        self.prefix.as_bytes()
    }

    /// Maps an application key to its native key.
    #[must_use]
    pub fn encode_key(&self, key: &str) -> Vec<u8> {
        let mut native = Vec::with_capacity(self.prefix.len() + key.len());
        native.extend_from_slice(self.prefix.as_bytes());
        native.extend_from_slice(key.as_bytes());
        native
    }

    /// Recovers the application key, or `None` if `native` is outside this
    /// namespace or not UTF-8.
    #[must_use]
    pub fn decode_key(&self, native: &[u8]) -> Option<String> {
        let suffix = native.strip_prefix(self.prefix.as_bytes())?;
        String::from_utf8(suffix.to_vec()).ok()
    }
}
