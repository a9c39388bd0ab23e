//! CLI command implementations.

pub mod cat;
pub mod inspect;
pub mod verify;

use cellstore_core::CoreError;
use cellstore_storage::{Access, CellOptions, OpenMode, StorageError};
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Structure kinds the CLI understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// `PersistentArray`
    Array,
    /// `PersistentMap`
    Map,
    /// `PersistentLabeledMap`
    Labeled,
    /// `PersistentCollection`
    Collection,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Array => "array",
            Self::Map => "map",
            Self::Labeled => "labeled map",
            Self::Collection => "collection",
        })
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The structure's definitions file does not exist.
    #[error("no {kind} found at {}", root.display())]
    NotFound {
        /// Requested kind.
        kind: Kind,
        /// Requested root.
        root: PathBuf,
    },

    /// Another process holds the structure exclusively.
    #[error("{} is held exclusively by another process", root.display())]
    Busy {
        /// Requested root.
        root: PathBuf,
    },

    /// The root path has no UTF-8 base name.
    #[error("root {} has no usable file name", root.display())]
    BadRoot {
        /// Requested root.
        root: PathBuf,
    },

    /// `verify` found problems.
    #[error("verification failed with {problems} problem(s)")]
    VerificationFailed {
        /// Number of problems found.
        problems: usize,
    },
}

/// Options for opening structures without modifying them.
///
/// Shared mode so a running exclusive owner is reported instead of blocked on.
#[must_use]
pub fn read_only() -> CellOptions {
    CellOptions::shared()
        .access(Access::Read)
        .mode(OpenMode::Open)
}

/// Maps an open failure to a friendlier CLI error where one applies.
pub fn open_error(kind: Kind, root: &Path, error: CoreError) -> Box<dyn std::error::Error> {
    match error {
        CoreError::Storage(e) if e.is_not_found() => Box::new(CliError::NotFound {
            kind,
            root: root.to_path_buf(),
        }),
        CoreError::Storage(e) if e.is_sharing_violation() => Box::new(CliError::Busy {
            root: root.to_path_buf(),
        }),
        other => Box::new(other),
    }
}

/// Maps a storage-level open failure for a single file.
pub fn storage_error(path: &Path, error: StorageError) -> Box<dyn std::error::Error> {
    if error.is_sharing_violation() {
        Box::new(CliError::Busy {
            root: path.to_path_buf(),
        })
    } else {
        Box::new(error)
    }
}

/// Decodes CBOR bytes into JSON, if they are CBOR.
#[must_use]
pub fn cbor_to_json(bytes: &[u8]) -> Option<serde_json::Value> {
    let value: ciborium::Value = ciborium::from_reader(bytes).ok()?;
    serde_json::to_value(value).ok()
}

/// Renders bytes as lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    use fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Formats a byte count for humans.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbor_strings_become_json() {
        let mut bytes = Vec::new();
        ciborium::into_writer(&("a", 1u8), &mut bytes).unwrap();
        assert_eq!(cbor_to_json(&bytes), Some(serde_json::json!(["a", 1])));
    }

    #[test]
    fn truncated_cbor_is_not_json() {
        assert_eq!(cbor_to_json(&[0x62, b'a']), None);
        assert_eq!(cbor_to_json(&[]), None);
    }

    #[test]
    fn hex_and_sizes() {
        assert_eq!(to_hex(&[0x00, 0xab]), "00ab");
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
