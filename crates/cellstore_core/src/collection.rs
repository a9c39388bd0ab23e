//! An unordered bag of values with generated keys.
//!
//! A collection is a [`PersistentLabeledMap`] plus a counter cell at
//! `__COLLECTIONMAXINDEX_<root>` holding the next id. Keys are the id as
//! sixteen lowercase hex digits, so member files sort in insertion order.

use crate::error::{CoreError, CoreResult};
use crate::labeled::PersistentLabeledMap;
use crate::path::{companion_path, COLLECTION_MAX_INDEX};
use cellstore_codec::{CborCodec, Codec, U64Codec};
use cellstore_storage::{Cell, CellOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// A bag of `T` values, each stored in its own file.
///
/// # Example
///
/// ```rust
/// use cellstore_core::PersistentCollection;
/// use cellstore_storage::CellOptions;
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut jobs = PersistentCollection::open(dir.path().join("jobs"), CellOptions::default()).unwrap();
///
/// jobs.add(&"build".to_string()).unwrap();
/// assert!(jobs.contains(&"build".to_string()).unwrap());
/// ```
pub struct PersistentCollection<T> {
    items: PersistentLabeledMap<T>,
    counter: Cell<u64>,
}

impl<T> PersistentCollection<T>
where
    T: Clone + Serialize + DeserializeOwned + 'static,
{
    /// Opens the collection rooted at `root`, encoding values as CBOR.
    ///
    /// # Errors
    ///
    /// See [`PersistentCollection::with_codec`].
    pub fn open(root: impl AsRef<Path>, options: CellOptions) -> CoreResult<Self> {
        Self::with_codec(root, options, Arc::new(CborCodec))
    }
}

impl<T: Clone> PersistentCollection<T> {
    /// Opens the collection rooted at `root` with an explicit value codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter or the underlying map cannot be opened.
    pub fn with_codec(
        root: impl AsRef<Path>,
        options: CellOptions,
        codec: Arc<dyn Codec<T>>,
    ) -> CoreResult<Self> {
        let root = root.as_ref();
        let counter = Cell::open(
            companion_path(root, COLLECTION_MAX_INDEX),
            options.clone(),
            Some(0),
            Arc::new(U64Codec),
        )?;
        let items = match PersistentLabeledMap::with_codec(root, options, codec) {
            Ok(items) => items,
            Err(error) => {
                counter.close()?;
                return Err(error);
            }
        };
        Ok(Self { items, counter })
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.items.root()
    }

    /// Stores `value` under a fresh key and returns the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter or the member cannot be written.
    pub fn add(&mut self, value: &T) -> CoreResult<String> {
        let counter = &self.counter;
        self.items.batch(|items| {
            let mut id = counter.value()?;
            let mut key = item_key(id);
            // Skip ids already taken by a writer whose counter update we raced.
            while items.contains_key(&key)? {
                id = next_id(id)?;
                key = item_key(id);
            }
            counter.write(&next_id(id)?)?;
            items.put(&key, value)?;
            trace!(key = %key, "added collection item");
            Ok(key)
        })
    }

    /// Returns the next id the counter will hand out.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cell cannot be read.
    pub fn counter(&self) -> CoreResult<u64> {
        Ok(self.counter.value()?)
    }

    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the member cannot be read.
    pub fn get(&self, key: &str) -> CoreResult<Option<T>> {
        self.items.try_get(key)
    }

    /// Removes the item stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions or the member file cannot be updated.
    pub fn remove_key(&mut self, key: &str) -> CoreResult<bool> {
        self.items.remove(key)
    }

    /// Returns every `(key, value)` pair in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn entries(&self) -> CoreResult<Vec<(String, T)>> {
        self.items.entries()
    }

    /// Returns every value in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn values(&self) -> CoreResult<Vec<T>> {
        self.items.values()
    }

    /// Returns the number of items.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn len(&self) -> CoreResult<usize> {
        self.items.len()
    }

    /// Returns true if the collection is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn is_empty(&self) -> CoreResult<bool> {
        self.items.is_empty()
    }

    /// Removes every item and resets the counter.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be updated.
    pub fn clear(&mut self) -> CoreResult<()> {
        let counter = &self.counter;
        self.items.batch(|items| {
            items.clear()?;
            Ok(counter.write(&0)?)
        })
    }

    /// Releases every handle, deleting all files if `delete_on_dispose` is set.
    ///
    /// # Errors
    ///
    /// Returns the first release error.
    pub fn dispose(self) -> CoreResult<()> {
        let Self { items, counter } = self;
        let items = items.dispose();
        counter.dispose()?;
        items
    }
}

impl<T: Clone + PartialEq> PersistentCollection<T> {
    /// Returns true if some item equals `value`.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn contains(&self, value: &T) -> CoreResult<bool> {
        Ok(self.values()?.iter().any(|v| v == value))
    }

    /// Removes the first item equal to `value`.
    ///
    /// Returns true if an item was removed.
    ///
    /// # Errors
    ///
    /// Returns the first read error, or an error if the item cannot be removed.
    pub fn remove(&mut self, value: &T) -> CoreResult<bool> {
        self.items.batch(|items| {
            let found = items
                .entries()?
                .into_iter()
                .find(|(_, v)| v == value)
                .map(|(key, _)| key);
            match found {
                Some(key) => items.remove(&key),
                None => Ok(false),
            }
        })
    }
}

fn item_key(id: u64) -> String {
    format!("{id:016x}")
}

fn next_id(id: u64) -> CoreResult<u64> {
    id.checked_add(1)
        .ok_or_else(|| CoreError::corrupted("collection counter exhausted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn open_bag(root: &Path, options: CellOptions) -> PersistentCollection<String> {
        PersistentCollection::open(root, options).unwrap()
    }

    #[test]
    fn add_generates_ordered_hex_keys() {
        let dir = tempdir().unwrap();
        let mut bag = open_bag(&dir.path().join("c"), CellOptions::default());

        assert_eq!(bag.add(&"a".into()).unwrap(), "0000000000000000");
        assert_eq!(bag.add(&"b".into()).unwrap(), "0000000000000001");
        assert_eq!(
            fs::read(dir.path().join("__COLLECTIONMAXINDEX_c")).unwrap(),
            2u64.to_le_bytes()
        );
        assert_eq!(bag.counter().unwrap(), 2);
    }

    #[test]
    fn duplicates_are_kept_and_removed_one_at_a_time() {
        let dir = tempdir().unwrap();
        let mut bag = open_bag(&dir.path().join("c"), CellOptions::default());
        bag.add(&"x".into()).unwrap();
        bag.add(&"y".into()).unwrap();
        bag.add(&"x".into()).unwrap();

        assert!(bag.remove(&"x".into()).unwrap());
        assert_eq!(bag.values().unwrap(), vec!["y".to_string(), "x".to_string()]);
        assert!(bag.remove(&"x".into()).unwrap());
        assert!(!bag.remove(&"x".into()).unwrap());
        assert!(!bag.contains(&"x".into()).unwrap());
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let dir = tempdir().unwrap();
        let mut bag = open_bag(&dir.path().join("c"), CellOptions::default());
        let first = bag.add(&"a".into()).unwrap();
        bag.remove_key(&first).unwrap();

        assert_eq!(bag.add(&"b".into()).unwrap(), "0000000000000001");
        assert_eq!(bag.get(&first).unwrap(), None);
    }

    #[test]
    fn clear_resets_counter() {
        let dir = tempdir().unwrap();
        let mut bag = open_bag(&dir.path().join("c"), CellOptions::default());
        bag.add(&"a".into()).unwrap();
        bag.add(&"b".into()).unwrap();

        bag.clear().unwrap();
        assert!(bag.is_empty().unwrap());
        assert_eq!(bag.add(&"c".into()).unwrap(), "0000000000000000");
    }

    #[test]
    fn stale_counter_skips_taken_ids() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("c");
        {
            let mut bag = open_bag(&root, CellOptions::default());
            bag.add(&"a".into()).unwrap();
        }
        fs::write(dir.path().join("__COLLECTIONMAXINDEX_c"), 0u64.to_le_bytes()).unwrap();

        let mut bag = open_bag(&root, CellOptions::default());
        assert_eq!(bag.add(&"b".into()).unwrap(), "0000000000000001");
        assert_eq!(bag.len().unwrap(), 2);
    }

    #[test]
    fn shared_handles_see_each_others_items() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("c");
        let mut a = open_bag(&root, CellOptions::shared());
        let mut b = open_bag(&root, CellOptions::shared());

        a.add(&"from a".into()).unwrap();
        let key = b.add(&"from b".into()).unwrap();
        assert_eq!(key, "0000000000000001");
        assert_eq!(a.len().unwrap(), 2);
        assert!(a.remove(&"from b".into()).unwrap());
        assert_eq!(b.values().unwrap(), vec!["from a".to_string()]);
    }

    #[test]
    fn dispose_with_delete_removes_every_file() {
        let dir = tempdir().unwrap();
        let mut bag = open_bag(&dir.path().join("c"), CellOptions::new().delete_on_dispose(true));
        bag.add(&"a".into()).unwrap();
        bag.add(&"b".into()).unwrap();

        bag.dispose().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
