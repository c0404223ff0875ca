//! Error types for the adapter layer.

use prefstore_codec::CodecError;
use prefstore_storage::StorageError;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error a user callback may return from [`iterate`](crate::StoreAdapter::iterate).
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by adapters.
///
/// A missing key is never an error; reads report it as `None`.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The value to store contains a reference cycle.
    #[error("value contains a reference cycle")]
    CyclicValue,

    /// Stored bytes under `key` could not be decoded.
    #[error("corrupted entry under key {key:?}: {source}")]
    CorruptedEntry {
        /// Application key of the entry.
        key: String,
        /// Decoder failure.
        #[source]
        source: CodecError,
    },

    /// The adapter was torn down or its engine closed.
    #[error("store is closed")]
    ClosedStore,

    /// The engine failed.
    #[error("backend error: {0}")]
    BackendIo(#[source] StorageError),

    /// A native key outside this adapter's namespace reached it.
    #[error("key {key:?} is outside the adapter namespace")]
    NamespaceMismatch {
        /// The native key, lossily decoded.
        key: String,
    },

    /// The application key cannot be stored.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Why the key was rejected.
        message: String,
    },

    /// The adapter configuration is unusable.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The value could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[source] CodecError),

    /// An iteration callback failed.
    #[error("iteration callback failed: {0}")]
    Callback(#[source] CallbackError),
}

impl AdapterError {
    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` for [`AdapterError::ClosedStore`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedStore)
    }
}

impl From<StorageError> for AdapterError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Closed => Self::ClosedStore,
            other => Self::BackendIo(other),
        }
    }
}

impl From<CodecError> for AdapterError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::CyclicValue => Self::CyclicValue,
            other => Self::Codec(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_engine_maps_to_closed_store() {
        assert!(AdapterError::from(StorageError::Closed).is_closed());
        assert!(matches!(
            AdapterError::from(StorageError::corrupted("bad")),
            AdapterError::BackendIo(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn cycle_maps_to_cyclic_value() {
        assert!(matches!(
            AdapterError::from(CodecError::CyclicValue),
            AdapterError::CyclicValue
        ));
        assert!(matches!(
            AdapterError::from(CodecError::IntegerOverflow),
            AdapterError::Codec(_)
        ));
    }
}
