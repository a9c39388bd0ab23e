//! Error types for cell operations.

use cellstore_codec::CodecError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for cell operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while opening, reading or writing a cell.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another handle holds the file in a conflicting share mode.
    #[error("sharing violation on {}: {source}", path.display())]
    SharingViolation {
        /// The contended file.
        path: PathBuf,
        /// The error reported by the OS lock call.
        source: io::Error,
    },

    /// The cell was not opened with the capability the operation needs.
    #[error("{operation} not permitted on {}", path.display())]
    AccessDenied {
        /// The cell file.
        path: PathBuf,
        /// The attempted operation ("read" or "write").
        operation: &'static str,
    },

    /// The combination of open options is not supported.
    #[error("invalid cell options: {message}")]
    InvalidOptions {
        /// Description of the misuse.
        message: String,
    },

    /// The file must be created but no default value was supplied.
    #[error("no default value to create {}", path.display())]
    MissingDefault {
        /// The file that would have been created.
        path: PathBuf,
    },

    /// The file content could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The cell has been closed.
    #[error("cell is closed")]
    Closed,
}

impl StorageError {
    /// Creates an invalid options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Returns true if the error is a sharing violation.
    #[must_use]
    pub fn is_sharing_violation(&self) -> bool {
        matches!(self, Self::SharingViolation { .. })
    }

    /// Returns true if the error reports a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
