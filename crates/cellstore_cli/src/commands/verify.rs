//! Verify command implementation.
//!
//! Compares the backing files a structure's definitions list against the
//! backing files actually present next to its root.

use super::{open_error, read_only, storage_error, CliError, Format, Kind};
use cellstore_codec::{decode_counter, decode_label, RawCodec, U64Codec, Utf8Codec};
use cellstore_core::path::{
    base_name, companion_path, member_fragment, ARRAY_DATA, ARRAY_MEMBER, COLLECTION_MAX_INDEX,
    DICTIONARY_DATA, DICTIONARY_MEMBER, DICTIONARY_VALUE,
};
use cellstore_core::{
    element_path, member_path, parse_keys, value_path, CoreError, Directory, MetadataCodec,
};
use cellstore_storage::Cell;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Verification result.
#[derive(Debug, Default, Serialize)]
pub struct VerifyResult {
    /// Number of backing files the definitions list.
    pub listed: usize,
    /// Number of backing files found on disk.
    pub found: usize,
    /// Listed files that do not exist.
    pub missing: Vec<String>,
    /// Files on disk that nothing lists.
    pub orphans: Vec<String>,
    /// Other inconsistencies.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Total number of problems found.
    #[must_use]
    pub fn problems(&self) -> usize {
        self.missing.len() + self.orphans.len() + self.errors.len()
    }

    /// Returns true if no problems were found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems() == 0
    }
}

/// Runs the verify command.
pub fn run(root: &Path, kind: Kind, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let result = verify(root, kind)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_result(root, kind, &result),
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(CliError::VerificationFailed {
            problems: result.problems(),
        }
        .into())
    }
}

/// Checks a structure without printing anything.
pub fn verify(root: &Path, kind: Kind) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let base = base_name(root).ok_or_else(|| CliError::BadRoot {
        root: root.to_path_buf(),
    })?;
    let mut result = VerifyResult::default();

    let (prefix, listed): (&str, Vec<PathBuf>) = match kind {
        Kind::Array => (ARRAY_MEMBER, listed_elements(root).map_err(|e| open_error(kind, root, e))?),
        Kind::Map => (DICTIONARY_VALUE, listed_values(root).map_err(|e| open_error(kind, root, e))?),
        Kind::Labeled | Kind::Collection => {
            let keys = listed_keys(root).map_err(|e| open_error(kind, root, e))?;
            if kind == Kind::Collection {
                check_collection_keys(root, &keys, &mut result)?;
            }
            (
                DICTIONARY_MEMBER,
                keys.iter().map(|key| member_path(root, key)).collect(),
            )
        }
    };

    let listed: BTreeSet<String> = listed
        .iter()
        .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
        .collect();
    let found = scan_members(root, prefix, base)?;
    debug!(root = %root.display(), listed = listed.len(), found = found.len(), "scanned members");

    result.listed = listed.len();
    result.found = found.len();
    result.missing = listed.difference(&found).cloned().collect();
    result.orphans = found.difference(&listed).cloned().collect();
    Ok(result)
}

fn listed_elements(root: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let cell = Cell::open(
        companion_path(root, ARRAY_DATA),
        read_only(),
        None,
        Arc::new(MetadataCodec),
    )?;
    let meta = cell.value()?;
    cell.close()?;
    Ok((0..meta.length)
        .map(|index| element_path(root, meta.backing_index(index)))
        .collect())
}

fn listed_values(root: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let text = read_definitions(root)?;
    let directory = Directory::<Vec<u8>>::parse(&text, &RawCodec)?;
    Ok(directory
        .order
        .iter()
        .map(|key| value_path(root, &directory.names[key]))
        .collect())
}

fn listed_keys(root: &Path) -> Result<Vec<String>, CoreError> {
    parse_keys(&read_definitions(root)?)
}

fn read_definitions(root: &Path) -> Result<String, CoreError> {
    let cell = Cell::open(
        companion_path(root, DICTIONARY_DATA),
        read_only(),
        None,
        Arc::new(Utf8Codec),
    )?;
    let text = cell.value()?;
    cell.close()?;
    Ok(text)
}

fn check_collection_keys(
    root: &Path,
    keys: &[String],
    result: &mut VerifyResult,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = companion_path(root, COLLECTION_MAX_INDEX);
    let cell = match Cell::open(&path, read_only(), None, Arc::new(U64Codec)) {
        Ok(cell) => cell,
        Err(e) if e.is_not_found() => {
            result.errors.push("collection counter file is missing".to_string());
            return Ok(());
        }
        Err(e) => return Err(storage_error(&path, e)),
    };
    let counter = match cell.read()? {
        Ok(counter) => counter,
        Err(e) => {
            result.errors.push(format!("collection counter is unreadable: {e}"));
            return Ok(());
        }
    };
    cell.close()?;

    for key in keys {
        match u64::from_str_radix(key, 16) {
            Ok(id) if key.len() == 16 && id < counter => {}
            Ok(id) if key.len() == 16 => result
                .errors
                .push(format!("key {key} is not below the counter ({id} >= {counter})")),
            _ => result.errors.push(format!("key {key:?} is not a collection id")),
        }
    }
    Ok(())
}

/// Collects the file names next to `root` that look like its members.
fn scan_members(root: &Path, prefix: &str, base: &str) -> std::io::Result<BTreeSet<String>> {
    let dir = match root.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut found = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(fragment) = member_fragment(name, prefix, base) {
            if is_member_fragment(prefix, fragment) {
                found.insert(name.to_string());
            }
        }
    }
    Ok(found)
}

/// Rejects fragments that belong to another root sharing this base's suffix.
fn is_member_fragment(prefix: &str, fragment: &str) -> bool {
    match prefix {
        ARRAY_MEMBER => fragment.parse::<u64>().is_ok(),
        DICTIONARY_VALUE => decode_counter(fragment).is_ok(),
        DICTIONARY_MEMBER => decode_label(fragment).is_ok(),
        _ => false,
    }
}

fn print_result(root: &Path, kind: Kind, result: &VerifyResult) {
    println!("Verifying {kind} at {}", root.display());
    println!();
    println!("  Listed files: {}", result.listed);
    println!("  Found files:  {}", result.found);
    for name in &result.missing {
        println!("  missing: {name}");
    }
    for name in &result.orphans {
        println!("  orphan:  {name}");
    }
    for error in &result.errors {
        println!("  error:   {error}");
    }
    println!();
    if result.is_ok() {
        println!("✓ Verification passed");
    } else {
        println!("✗ Verification failed ({} problem(s))", result.problems());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstore_core::{PersistentArray, PersistentCollection, PersistentMap};
    use cellstore_storage::CellOptions;
    use tempfile::tempdir;

    #[test]
    fn healthy_array_passes() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("a");
        {
            let mut array = PersistentArray::open(&root, CellOptions::default()).unwrap();
            for i in 0..5u32 {
                array.push_front(i).unwrap();
            }
        }

        let result = verify(&root, Kind::Array).unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(result.listed, 5);
    }

    #[test]
    fn orphans_and_missing_files_are_reported() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("m");
        {
            let mut map = PersistentMap::open(&root, CellOptions::default()).unwrap();
            map.put("a".to_string(), &1u8).unwrap();
            map.put("b".to_string(), &2u8).unwrap();
        }
        fs::remove_file(dir.path().join("__DICTIONARYVALUE_0_m")).unwrap();
        fs::write(dir.path().join("__DICTIONARYVALUE_z_m"), b"").unwrap();
        // Belongs to a root named "x_m", not to "m".
        fs::write(dir.path().join("__DICTIONARYVALUE_0_x_m"), b"").unwrap();

        let result = verify(&root, Kind::Map).unwrap();
        assert_eq!(result.missing, ["__DICTIONARYVALUE_0_m"]);
        assert_eq!(result.orphans, ["__DICTIONARYVALUE_z_m"]);
    }

    #[test]
    fn collection_counter_behind_keys_is_an_error() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("c");
        {
            let mut bag = PersistentCollection::open(&root, CellOptions::default()).unwrap();
            bag.add(&"x".to_string()).unwrap();
        }
        fs::write(dir.path().join("__COLLECTIONMAXINDEX_c"), 0u64.to_le_bytes()).unwrap();

        let result = verify(&root, Kind::Collection).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.missing.is_empty() && result.orphans.is_empty());
    }
}
