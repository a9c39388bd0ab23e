//! Inspect command implementation.

use super::{cbor_to_json, format_size, open_error, read_only, to_hex, Format, Kind};
use cellstore_codec::{Codec, RawCodec};
use cellstore_core::{PersistentArray, PersistentCollection, PersistentLabeledMap, PersistentMap};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Structure inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Structure kind.
    pub kind: Kind,
    /// Root path.
    pub root: String,
    /// Number of elements or keys.
    pub count: usize,
    /// Sum of all value file sizes in bytes.
    pub total_size: u64,
    /// Array layout (arrays only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<ArrayLayout>,
    /// Next id to be handed out (collections only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter: Option<u64>,
    /// One entry per element or key.
    pub entries: Vec<EntryInfo>,
}

/// Array metadata as stored.
#[derive(Debug, Serialize)]
pub struct ArrayLayout {
    /// Number of elements.
    pub length: u64,
    /// Backing index of element 0.
    pub offset: u64,
}

/// A single element or key.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Index, string key, or decoded map key.
    pub key: Value,
    /// Encoded value size in bytes.
    pub size: u64,
    /// Decoded value, if requested and decodable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Runs the inspect command.
pub fn run(
    root: &Path,
    kind: Kind,
    show_values: bool,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    debug!(root = %root.display(), %kind, "inspecting");
    let result = inspect(root, kind, show_values)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

/// Collects the inspection result without printing it.
pub fn inspect(
    root: &Path,
    kind: Kind,
    show_values: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let codec: Arc<dyn Codec<Vec<u8>>> = Arc::new(RawCodec);
    let mut layout = None;
    let mut counter = None;

    let pairs: Vec<(Value, Vec<u8>)> = match kind {
        Kind::Array => {
            let array = PersistentArray::with_codec(root, read_only(), codec)
                .map_err(|e| open_error(kind, root, e))?;
            let meta = array.metadata()?;
            layout = Some(ArrayLayout {
                length: meta.length,
                offset: meta.offset,
            });
            array
                .to_vec()?
                .into_iter()
                .enumerate()
                .map(|(index, bytes)| (json!(index), bytes))
                .collect()
        }
        Kind::Map => {
            let map = PersistentMap::<Vec<u8>, _>::with_codecs(root, read_only(), Arc::new(RawCodec), codec)
                .map_err(|e| open_error(kind, root, e))?;
            map.entries()?
                .into_iter()
                .map(|(key, bytes)| {
                    let key = cbor_to_json(&key).unwrap_or_else(|| json!(to_hex(&key)));
                    (key, bytes)
                })
                .collect()
        }
        Kind::Labeled => {
            let map = PersistentLabeledMap::with_codec(root, read_only(), codec)
                .map_err(|e| open_error(kind, root, e))?;
            map.entries()?
                .into_iter()
                .map(|(key, bytes)| (json!(key), bytes))
                .collect()
        }
        Kind::Collection => {
            let bag = PersistentCollection::with_codec(root, read_only(), codec)
                .map_err(|e| open_error(kind, root, e))?;
            counter = Some(bag.counter()?);
            bag.entries()?
                .into_iter()
                .map(|(key, bytes)| (json!(key), bytes))
                .collect()
        }
    };

    let entries: Vec<EntryInfo> = pairs
        .into_iter()
        .map(|(key, bytes)| EntryInfo {
            key,
            size: bytes.len() as u64,
            value: if show_values { cbor_to_json(&bytes) } else { None },
        })
        .collect();

    Ok(InspectResult {
        kind,
        root: root.display().to_string(),
        count: entries.len(),
        total_size: entries.iter().map(|e| e.size).sum(),
        layout,
        counter,
        entries,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("CellStore {} Inspection", result.kind);
    println!("==========================");
    println!();
    println!("Root:  {}", result.root);
    println!("Count: {}", result.count);
    println!("Size:  {}", format_size(result.total_size));
    if let Some(layout) = &result.layout {
        println!("Layout: length {}, offset {}", layout.length, layout.offset);
    }
    if let Some(counter) = result.counter {
        println!("Next id: {counter}");
    }

    if !result.entries.is_empty() {
        println!();
        println!("Entries:");
        for entry in &result.entries {
            match &entry.value {
                Some(value) => println!("  [{}] {} = {}", entry.key, format_size(entry.size), value),
                None => println!("  [{}] {}", entry.key, format_size(entry.size)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstore_storage::CellOptions;
    use tempfile::tempdir;

    #[test]
    fn inspects_array_layout_and_values() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("a");
        {
            let mut array = PersistentArray::open(&root, CellOptions::default()).unwrap();
            array.push("x".to_string()).unwrap();
            array.push("y".to_string()).unwrap();
            array.pop_front().unwrap();
        }

        let result = inspect(&root, Kind::Array, true).unwrap();
        assert_eq!(result.count, 1);
        let layout = result.layout.unwrap();
        assert_eq!((layout.length, layout.offset), (1, 1));
        assert_eq!(result.entries[0].value, Some(json!("y")));
    }

    #[test]
    fn map_keys_are_decoded() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("m");
        {
            let mut map = PersistentMap::open(&root, CellOptions::default()).unwrap();
            map.put(7u32, &"seven".to_string()).unwrap();
        }

        let result = inspect(&root, Kind::Map, false).unwrap();
        assert_eq!(result.entries[0].key, json!(7));
        assert_eq!(result.entries[0].value, None);
    }

    #[test]
    fn missing_structure_is_reported() {
        let dir = tempdir().unwrap();
        let error = inspect(&dir.path().join("nothing"), Kind::Labeled, false).unwrap_err();
        assert!(error.to_string().starts_with("no labeled map found"));
    }
}
