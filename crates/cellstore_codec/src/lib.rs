//! # CellStore Codec
//!
//! Encodings shared by every CellStore structure.
//!
//! This crate provides:
//! - [`Codec`], the encode/decode capability injected into each cell
//! - Built-in codecs: [`CborCodec`] (serde default), [`Utf8Codec`],
//!   [`RawCodec`], [`U64Codec`] and the closure-based [`FnCodec`]
//! - The length-prefixed field codec used to pack map directories
//! - Filename-safe encodings for counters and string labels
//!
//! ## Usage
//!
//! ```
//! use cellstore_codec::{decode_one_field, encode_field, CborCodec, Codec};
//!
//! let bytes = CborCodec.encode(&("id".to_string(), 7u8)).unwrap();
//! let back: (String, u8) = CborCodec.decode(&bytes).unwrap();
//! assert_eq!(back, ("id".to_string(), 7));
//!
//! let packed = encode_field("alpha") + &encode_field("beta");
//! let (first, rest) = decode_one_field(&packed).unwrap();
//! assert_eq!(first, "alpha");
//! assert_eq!(decode_one_field(rest).unwrap().0, "beta");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod field;
mod names;

pub use codec::{CborCodec, Codec, FnCodec, RawCodec, U64Codec, Utf8Codec};
pub use error::{CodecError, CodecResult};
pub use field::{decode_fields, decode_one_field, encode_field, push_field};
pub use names::{decode_counter, decode_label, encode_counter, encode_label};
