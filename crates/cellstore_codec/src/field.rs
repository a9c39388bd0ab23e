//! Length-prefixed text fields.
//!
//! A field is `<decimal byte length>:<payload>`. Fields are self-delimiting,
//! so any number of them can be concatenated into one string and read back
//! one at a time without escaping:
//!
//! ```text
//! 1:33:abc0:
//! ^^^ ^^^^^ ^^
//! "3" "abc" ""
//! ```

use crate::error::{CodecError, CodecResult};

/// Separates the length prefix from the payload.
const LENGTH_TERMINATOR: char = ':';

/// Encodes one field.
///
/// # Example
///
/// ```
/// use cellstore_codec::encode_field;
///
/// assert_eq!(encode_field("hello"), "5:hello");
/// assert_eq!(encode_field(""), "0:");
/// ```
#[must_use]
pub fn encode_field(payload: &str) -> String {
    format!("{}{LENGTH_TERMINATOR}{payload}", payload.len())
}

/// Appends one encoded field to `out`.
pub fn push_field(out: &mut String, payload: &str) {
    out.push_str(&payload.len().to_string());
    out.push(LENGTH_TERMINATOR);
    out.push_str(payload);
}

/// Decodes the first field of `input`, returning `(payload, remainder)`.
///
/// # Errors
///
/// Returns an error if the length prefix is missing or malformed, or if
/// `input` ends before the declared payload length.
pub fn decode_one_field(input: &str) -> CodecResult<(&str, &str)> {
    let colon = input.find(LENGTH_TERMINATOR).ok_or(CodecError::UnexpectedEof)?;
    let digits = &input[..colon];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CodecError::invalid_structure(format!(
            "bad field length prefix {digits:?}"
        )));
    }
    let len: usize = digits
        .parse()
        .map_err(|_| CodecError::invalid_structure("field length overflows"))?;

    let start = colon + 1;
    let end = start.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
    if end > input.len() {
        return Err(CodecError::UnexpectedEof);
    }
    if !input.is_char_boundary(end) {
        return Err(CodecError::invalid_structure(
            "field length splits a UTF-8 character",
        ));
    }
    Ok((&input[start..end], &input[end..]))
}

/// Decodes every field of `input` until it is exhausted.
///
/// # Errors
///
/// Fails on the first malformed field.
pub fn decode_fields(mut input: &str) -> CodecResult<Vec<&str>> {
    let mut fields = Vec::new();
    while !input.is_empty() {
        let (field, rest) = decode_one_field(input)?;
        fields.push(field);
        input = rest;
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decode_returns_remainder() {
        let (field, rest) = decode_one_field("3:abc2:de").unwrap();
        assert_eq!(field, "abc");
        assert_eq!(rest, "2:de");
    }

    #[test]
    fn payload_may_contain_terminator() {
        let encoded = encode_field("a:b:c");
        assert_eq!(encoded, "5:a:b:c");
        assert_eq!(decode_one_field(&encoded).unwrap(), ("a:b:c", ""));
    }

    #[test]
    fn length_counts_bytes_not_chars() {
        let encoded = encode_field("é");
        assert_eq!(encoded, "2:é");
        assert_eq!(decode_one_field(&encoded).unwrap().0, "é");
    }

    #[test]
    fn missing_terminator_is_eof() {
        assert_eq!(decode_one_field("12").unwrap_err(), CodecError::UnexpectedEof);
    }

    #[test]
    fn short_payload_is_eof() {
        assert_eq!(
            decode_one_field("9:abc").unwrap_err(),
            CodecError::UnexpectedEof
        );
    }

    #[test]
    fn non_numeric_prefix_fails() {
        assert!(matches!(
            decode_one_field("x:abc"),
            Err(CodecError::InvalidStructure { .. })
        ));
        assert!(matches!(
            decode_one_field(":abc"),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn split_character_fails() {
        assert!(matches!(
            decode_one_field("1:é"),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn push_matches_encode() {
        let mut out = String::new();
        push_field(&mut out, "key");
        push_field(&mut out, "");
        assert_eq!(out, format!("{}{}", encode_field("key"), encode_field("")));
    }

    proptest! {
        #[test]
        fn concatenated_fields_split_back(parts in prop::collection::vec(".*", 0..8)) {
            let mut packed = String::new();
            for part in &parts {
                push_field(&mut packed, part);
            }
            let decoded = decode_fields(&packed).unwrap();
            prop_assert_eq!(decoded, parts.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}
