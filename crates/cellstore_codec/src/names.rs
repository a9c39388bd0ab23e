//! Filename-safe encodings used to name backing files.
//!
//! Counter names are lowercase base-36 so they stay short and never depend
//! on the case sensitivity of the filesystem. Labels are lowercase hex of
//! the UTF-8 bytes, which maps any string key to a fragment that contains
//! no path separators.

use crate::error::{CodecError, CodecResult};

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Renders a counter value as a compact base-36 name.
///
/// ```
/// use cellstore_codec::encode_counter;
///
/// assert_eq!(encode_counter(0), "0");
/// assert_eq!(encode_counter(35), "z");
/// assert_eq!(encode_counter(36), "10");
/// ```
#[must_use]
pub fn encode_counter(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

/// Parses a name produced by [`encode_counter`].
///
/// # Errors
///
/// Returns an error for empty input, characters outside `0-9a-z`, or
/// values that overflow `u64`.
pub fn decode_counter(name: &str) -> CodecResult<u64> {
    if name.is_empty() {
        return Err(CodecError::UnexpectedEof);
    }
    name.bytes().try_fold(0u64, |acc, b| {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'z' => b - b'a' + 10,
            _ => {
                return Err(CodecError::invalid_structure(format!(
                    "invalid counter digit {:?}",
                    char::from(b)
                )))
            }
        };
        acc.checked_mul(36)
            .and_then(|v| v.checked_add(u64::from(digit)))
            .ok_or_else(|| CodecError::invalid_structure("counter overflows u64"))
    })
}

/// Maps a string key to a filename-safe fragment.
///
/// ```
/// use cellstore_codec::encode_label;
///
/// assert_eq!(encode_label("a/b"), "612f62");
/// ```
#[must_use]
pub fn encode_label(key: &str) -> String {
    let mut out = String::with_capacity(key.len() * 2);
    for b in key.bytes() {
        out.push(char::from(HEX_DIGITS[usize::from(b >> 4)]));
        out.push(char::from(HEX_DIGITS[usize::from(b & 0x0f)]));
    }
    out
}

/// Recovers the key from a fragment produced by [`encode_label`].
///
/// # Errors
///
/// Returns an error for odd-length input, non-hex digits or bytes that are
/// not valid UTF-8.
pub fn decode_label(fragment: &str) -> CodecResult<String> {
    let raw = fragment.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(CodecError::invalid_structure("odd-length label"));
    }
    let nibble = |b: u8| -> CodecResult<u8> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            _ => Err(CodecError::invalid_structure("invalid hex digit in label")),
        }
    };
    let bytes = raw
        .chunks_exact(2)
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect::<CodecResult<Vec<u8>>>()?;
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_names_are_compact() {
        assert_eq!(encode_counter(1295), "zz");
        assert_eq!(encode_counter(1296), "100");
        assert_eq!(encode_counter(u64::MAX), "3w5e11264sgsf");
    }

    #[test]
    fn counter_decode_inverts_encode() {
        for value in [0, 1, 35, 36, 1000, 46_655, u64::MAX] {
            assert_eq!(decode_counter(&encode_counter(value)).unwrap(), value);
        }
    }

    #[test]
    fn counter_rejects_uppercase() {
        assert!(decode_counter("A").is_err());
        assert!(decode_counter("").is_err());
    }

    #[test]
    fn counter_overflow_fails() {
        assert!(decode_counter("zzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn label_roundtrip_unicode() {
        let key = "naïve key\twith/sep";
        assert_eq!(decode_label(&encode_label(key)).unwrap(), key);
    }

    #[test]
    fn empty_label_is_empty() {
        assert_eq!(encode_label(""), "");
        assert_eq!(decode_label("").unwrap(), "");
    }

    #[test]
    fn label_rejects_bad_input() {
        assert!(decode_label("abc").is_err());
        assert!(decode_label("zz").is_err());
    }
}
