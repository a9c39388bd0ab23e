//! The `Codec` capability and the built-in codecs.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Converts a value to and from the exact bytes stored in a cell file.
///
/// A codec is injected into every cell at construction. The file content of
/// a cell is always exactly `encode(value)`, so `decode(encode(v))` must
/// yield a value equal to `v`.
///
/// Codecs are shared between the cells of a composite structure, hence the
/// `Send + Sync` bound.
pub trait Codec<T>: Send + Sync {
    /// Encodes `value` into the bytes that will make up the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented.
    fn encode(&self, value: &T) -> CodecResult<Vec<u8>>;

    /// Decodes a value from the entire contents of a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are truncated or otherwise corrupt.
    fn decode(&self, bytes: &[u8]) -> CodecResult<T>;
}

/// Serde-based CBOR codec. This is the default codec for cell values.
///
/// # Example
///
/// ```
/// use cellstore_codec::{CborCodec, Codec};
///
/// let codec = CborCodec;
/// let bytes = codec.encode(&vec![1u32, 2, 3]).unwrap();
/// let decoded: Vec<u32> = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl<T> Codec<T> for CborCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> CodecResult<Vec<u8>> {
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(value, &mut buffer)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(buffer)
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<T> {
        if bytes.is_empty() {
            return Err(CodecError::UnexpectedEof);
        }
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

/// Stores a `String` as its raw UTF-8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn encode(&self, value: &String) -> CodecResult<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

/// Stores bytes verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec<Vec<u8>> for RawCodec {
    fn encode(&self, value: &Vec<u8>) -> CodecResult<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Stores a `u64` as exactly 8 little-endian bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Codec;

impl Codec<u64> for U64Codec {
    fn encode(&self, value: &u64) -> CodecResult<Vec<u8>> {
        Ok(value.to_le_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<u64> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| CodecError::LengthMismatch {
            expected: 8,
            actual: bytes.len(),
        })?;
        Ok(u64::from_le_bytes(raw))
    }
}

/// A codec assembled from a pair of closures.
///
/// ```
/// use cellstore_codec::{Codec, CodecError, FnCodec};
///
/// let codec = FnCodec::new(
///     |v: &bool| Ok(vec![u8::from(*v)]),
///     |b: &[u8]| match b {
///         [0] => Ok(false),
///         [1] => Ok(true),
///         _ => Err(CodecError::decoding_failed("not a bool")),
///     },
/// );
/// assert!(codec.decode(&codec.encode(&true).unwrap()).unwrap());
/// ```
pub struct FnCodec<T, E, D> {
    encode: E,
    decode: D,
    _marker: PhantomData<fn() -> T>,
}

impl<T, E, D> FnCodec<T, E, D>
where
    E: Fn(&T) -> CodecResult<Vec<u8>> + Send + Sync,
    D: Fn(&[u8]) -> CodecResult<T> + Send + Sync,
{
    /// Creates a codec from an encoder and a decoder.
    pub fn new(encode: E, decode: D) -> Self {
        Self {
            encode,
            decode,
            _marker: PhantomData,
        }
    }
}

impl<T, E, D> Codec<T> for FnCodec<T, E, D>
where
    E: Fn(&T) -> CodecResult<Vec<u8>> + Send + Sync,
    D: Fn(&[u8]) -> CodecResult<T> + Send + Sync,
{
    fn encode(&self, value: &T) -> CodecResult<Vec<u8>> {
        (self.encode)(value)
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<T> {
        (self.decode)(bytes)
    }
}
