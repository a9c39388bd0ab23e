//! Cat command implementation.

use super::{cbor_to_json, read_only, storage_error, to_hex};
use cellstore_codec::RawCodec;
use cellstore_storage::Cell;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Runs the cat command.
pub fn run(file: &Path, hex: bool) -> Result<(), Box<dyn std::error::Error>> {
    let cell = Cell::open(file, read_only(), None, Arc::new(RawCodec))
        .map_err(|e| storage_error(file, e))?;
    let bytes = cell.value()?;
    cell.close()?;
    debug!(path = %file.display(), len = bytes.len(), "read cell");

    println!("{}", render(&bytes, hex)?);
    Ok(())
}

fn render(bytes: &[u8], hex: bool) -> Result<String, serde_json::Error> {
    if hex {
        return Ok(to_hex(bytes));
    }
    match cbor_to_json(bytes) {
        Some(json) => serde_json::to_string_pretty(&json),
        None => Ok(format!("{} bytes, not CBOR: {}", bytes.len(), to_hex(bytes))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_cbor_as_json() {
        let mut bytes = Vec::new();
        ciborium::into_writer(&vec![1, 2], &mut bytes).unwrap();
        assert_eq!(render(&bytes, false).unwrap(), "[\n  1,\n  2\n]");
        assert_eq!(render(&bytes, true).unwrap(), "820102");
    }

    #[test]
    fn falls_back_to_hex() {
        assert_eq!(render(&[0xff, 0xff], false).unwrap(), "2 bytes, not CBOR: ffff");
    }
}
