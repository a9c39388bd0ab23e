//! Error types for CellStore structures.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in CellStore structures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Cell error.
    #[error("storage error: {0}")]
    Storage(#[from] cellstore_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] cellstore_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Array index outside `0..len`.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// The requested index.
        index: u64,
        /// The array length at the time of the call.
        len: u64,
    },

    /// Map key not present.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// Debug rendering of the key.
        key: String,
    },

    /// Key rejected by a labeled map.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Metadata or definitions do not describe a consistent structure.
    #[error("corrupted structure: {message}")]
    Corrupted {
        /// Description of the inconsistency.
        message: String,
    },

    /// A freshness poll gave up.
    #[error("timed out after {waited:?} waiting for a fresh value")]
    Timeout {
        /// How long the poll waited.
        waited: Duration,
    },

    /// A freshness poll was cancelled by the caller.
    #[error("wait for a fresh value was cancelled")]
    Cancelled,
}

impl CoreError {
    /// Creates a corrupted structure error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a key-not-found error from any debuggable key.
    pub fn key_not_found(key: &impl std::fmt::Debug) -> Self {
        Self::KeyNotFound {
            key: format!("{key:?}"),
        }
    }

    /// Returns true if this wraps a sharing violation.
    #[must_use]
    pub fn is_sharing_violation(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_sharing_violation())
    }
}
