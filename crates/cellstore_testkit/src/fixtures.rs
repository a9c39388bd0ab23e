//! Test fixtures and structure helpers.
//!
//! Every fixture owns a fresh temporary directory and a root path inside
//! it, so a test can open any structure and then look at exactly the files
//! that structure produced.

use cellstore_storage::CellOptions;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory with one structure root inside it.
pub struct TempRoot {
    dir: TempDir,
    root: PathBuf,
}

impl TempRoot {
    /// Creates a fresh directory and a root called `name` inside it.
    pub fn new(name: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let root = dir.path().join(name);
        Self { dir, root }
    }

    /// Returns the structure root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding the root's backing files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Returns every file name in the directory, sorted.
    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dir.path())
            .expect("Failed to list temp directory")
            .map(|entry| {
                entry
                    .expect("Failed to read directory entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }

    /// Returns the file names that start with `marker`.
    pub fn files_with(&self, marker: &str) -> Vec<String> {
        self.files()
            .into_iter()
            .filter(|name| name.starts_with(marker))
            .collect()
    }

    /// Returns true if the directory holds no files.
    pub fn is_empty(&self) -> bool {
        self.files().is_empty()
    }
}

/// Runs `f` with the root of a fresh temporary directory.
///
/// # Example
///
/// ```rust
/// use cellstore_testkit::with_temp_root;
///
/// with_temp_root("queue", |root| {
///     assert!(root.ends_with("queue"));
/// });
/// ```
pub fn with_temp_root<F, R>(name: &str, f: F) -> R
where
    F: FnOnce(&Path) -> R,
{
    let fixture = TempRoot::new(name);
    f(fixture.root())
}

/// Exclusive options that skip `sync_all`, for tests that write a lot.
#[must_use]
pub fn fast_exclusive() -> CellOptions {
    CellOptions::new().sync_on_write(false)
}

/// Shared options that skip `sync_all`.
#[must_use]
pub fn fast_shared() -> CellOptions {
    CellOptions::shared().sync_on_write(false)
}

/// Populated-structure scenarios.
pub mod scenarios {
    use super::*;
    use cellstore_core::{PersistentArray, PersistentLabeledMap, PersistentMap};

    /// Creates an array holding `0..count`, then closes it.
    pub fn populated_array(count: u32) -> TempRoot {
        let fixture = TempRoot::new("array");
        let mut array = PersistentArray::open(fixture.root(), fast_exclusive())
            .expect("Failed to open array");
        for i in 0..count {
            array.push(i).expect("Failed to push element");
        }
        array.dispose().expect("Failed to close array");
        fixture
    }

    /// Creates a map from `key<i>` to `i` for `0..count`, then closes it.
    pub fn populated_map(count: u32) -> TempRoot {
        let fixture = TempRoot::new("map");
        let mut map = PersistentMap::open(fixture.root(), fast_exclusive())
            .expect("Failed to open map");
        for i in 0..count {
            map.put(format!("key{i}"), &i).expect("Failed to put value");
        }
        map.dispose().expect("Failed to close map");
        fixture
    }

    /// Creates a labeled map from `label<i>` to `i` for `0..count`, then closes it.
    pub fn populated_labeled(count: u32) -> TempRoot {
        let fixture = TempRoot::new("labeled");
        let mut map = PersistentLabeledMap::open(fixture.root(), fast_exclusive())
            .expect("Failed to open labeled map");
        map.extend((0..count).map(|i| (format!("label{i}"), i)))
            .expect("Failed to extend labeled map");
        map.dispose().expect("Failed to close labeled map");
        fixture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstore_core::{PersistentArray, PersistentMap};

    #[test]
    fn fixture_starts_empty() {
        let fixture = TempRoot::new("x");
        assert!(fixture.is_empty());
        assert_eq!(fixture.root().parent(), Some(fixture.dir()));
    }

    #[test]
    fn populated_array_reopens() {
        let fixture = scenarios::populated_array(4);
        let array: PersistentArray<u32> = PersistentArray::open(fixture.root(), fast_exclusive()).unwrap();
        assert_eq!(array.to_vec().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(fixture.files_with("__ARRAYMEMBER_").len(), 4);
    }

    #[test]
    fn populated_map_reopens() {
        let fixture = scenarios::populated_map(3);
        let map: PersistentMap<String, u32> = PersistentMap::open(fixture.root(), fast_exclusive()).unwrap();
        assert_eq!(map.get(&"key2".to_string()).unwrap(), 2);
    }
}
