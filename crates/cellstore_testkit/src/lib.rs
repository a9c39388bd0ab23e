//! # CellStore Testkit
//!
//! Test utilities for CellStore.
//!
//! This crate provides:
//! - Temporary root fixtures and populated-structure scenarios
//! - Property-based test generators using proptest
//! - Model-tracking harnesses that check a structure against an in-memory twin
//!
//! ## Usage
//!
//! ```rust
//! use cellstore_testkit::prelude::*;
//! use cellstore_core::PersistentArray;
//!
//! with_temp_root("items", |root| {
//!     let mut array = PersistentArray::open(root, fast_exclusive()).unwrap();
//!     array.push(1u32).unwrap();
//!     assert_eq!(array.len().unwrap(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
