//! Companion path derivation.
//!
//! Every structure is rooted at a caller-supplied path. Its backing files
//! live next to that path and are named by inserting a marker before the
//! root's base name:
//!
//! ```text
//! data/items                         root
//! data/__ARRAYDATA_items             array metadata
//! data/__ARRAYMEMBER_7_items         array backing index 7
//! data/__DICTIONARY_DATA_items       map definitions
//! data/__DICTIONARYVALUE_2s_items    map value named "2s"
//! data/__DICTIONARYMEMBER_6b6579_items labeled map member for key "key"
//! data/__LATESTUPDATE_items          synced cell timestamp
//! data/__COLLECTIONMAXINDEX_items    collection key counter
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Array metadata marker.
pub const ARRAY_DATA: &str = "__ARRAYDATA_";
/// Array element marker prefix.
pub const ARRAY_MEMBER: &str = "__ARRAYMEMBER_";
/// Synced cell timestamp marker.
pub const LATEST_UPDATE: &str = "__LATESTUPDATE_";
/// Map and labeled map definitions marker.
pub const DICTIONARY_DATA: &str = "__DICTIONARY_DATA_";
/// Map value marker prefix.
pub const DICTIONARY_VALUE: &str = "__DICTIONARYVALUE_";
/// Labeled map member marker prefix.
pub const DICTIONARY_MEMBER: &str = "__DICTIONARYMEMBER_";
/// Collection counter marker.
pub const COLLECTION_MAX_INDEX: &str = "__COLLECTIONMAXINDEX_";

/// Longest backing file name, in bytes, that common filesystems accept.
pub const MAX_FILE_NAME: usize = 255;

/// Inserts `marker` before the base name of `path`.
///
/// ```
/// use cellstore_core::path::companion_path;
/// use std::path::Path;
///
/// assert_eq!(
///     companion_path(Path::new("data/items"), "__ARRAYDATA_"),
///     Path::new("data/__ARRAYDATA_items"),
/// );
/// ```
#[must_use]
pub fn companion_path(path: &Path, marker: &str) -> PathBuf {
    let mut name = OsString::from(marker);
    if let Some(base) = path.file_name() {
        name.push(base);
    }
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Builds the marker for a member named `fragment` under `prefix`.
#[must_use]
pub fn member_marker(prefix: &str, fragment: &str) -> String {
    format!("{prefix}{fragment}_")
}

/// Extracts the member fragment from a backing file name.
///
/// Returns `None` unless `file_name` is `<prefix><fragment>_<base>`.
///
/// ```
/// use cellstore_core::path::{member_fragment, ARRAY_MEMBER};
///
/// assert_eq!(member_fragment("__ARRAYMEMBER_12_items", ARRAY_MEMBER, "items"), Some("12"));
/// assert_eq!(member_fragment("__ARRAYMEMBER_12_other", ARRAY_MEMBER, "items"), None);
/// ```
#[must_use]
pub fn member_fragment<'a>(file_name: &'a str, prefix: &str, base: &str) -> Option<&'a str> {
    file_name
        .strip_prefix(prefix)?
        .strip_suffix(base)?
        .strip_suffix('_')
}

/// Returns the base name of a root path as UTF-8, if it has one.
#[must_use]
pub fn base_name(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()
}
