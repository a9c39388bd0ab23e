//! # CellStore Core
//!
//! File-backed data structures built from [`cellstore_storage::Cell`]s.
//!
//! This crate provides:
//! - [`SyncedCell`]: a value plus last-update timestamp with freshness polling
//! - [`PersistentArray`]: a dynamic array with amortized O(1) front inserts
//! - [`PersistentMap`]: a map with arbitrary serializable keys
//! - [`PersistentLabeledMap`]: a string-keyed map with key-named files
//! - [`PersistentCollection`]: a bag of values with generated keys
//!
//! Every structure is rooted at a path and keeps its files next to it (see
//! [`path`]). Structures opened with [`cellstore_storage::Share::Shared`]
//! reload their metadata before every operation, so several handles (in
//! one process or several) observe each other's writes. Nothing is
//! transactional: a crash between two file writes can leave orphan files
//! or a stale definitions list.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod array;
mod collection;
mod error;
mod labeled;
mod map;
pub mod path;
mod synced;

pub use array::{element_path, ArrayMetadata, ArrayStats, MetadataCodec, PersistentArray, METADATA_SIZE};
pub use collection::PersistentCollection;
pub use error::{CoreError, CoreResult};
pub use labeled::{member_path, parse_keys, render_keys, PersistentLabeledMap};
pub use map::{value_path, Directory, PersistentMap};
pub use synced::{PollOptions, SyncedCell, TimestampCodec};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
