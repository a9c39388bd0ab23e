//! # CellStore Storage
//!
//! The persistence primitive for CellStore: a [`Cell`] holds one value as
//! the entire contents of one file.
//!
//! ## Design Principles
//!
//! - One value, one file; every write replaces the whole file
//! - Values go through an injected [`cellstore_codec::Codec`]
//! - The OS share mode is the only mutual-exclusion mechanism
//! - Handles are released on drop; `delete_on_dispose` removes the file
//!
//! ## Example
//!
//! ```rust
//! use cellstore_codec::Utf8Codec;
//! use cellstore_storage::{Cell, CellOptions};
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("motd");
//!
//! let cell = Cell::open(&path, CellOptions::default(), Some("hello".to_string()), Arc::new(Utf8Codec)).unwrap();
//! cell.write(&"goodbye".to_string()).unwrap();
//! assert_eq!(cell.value().unwrap(), "goodbye");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cell;
mod error;
mod options;

pub use cell::Cell;
pub use error::{StorageError, StorageResult};
pub use options::{Access, CellOptions, OpenMode, Share};
