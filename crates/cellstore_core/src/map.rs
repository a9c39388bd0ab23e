//! A keyed map stored as one file per value plus a definitions file.
//!
//! The definitions file is UTF-8 text made of length-prefixed fields:
//!
//! ```text
//! field(counter) ( field(base64(key bytes)) field(value name) )*
//! ```
//!
//! `counter` is the base-36 number of the next value name to hand out. It
//! only grows, so a name is never reused even after its key is removed.
//! Value `name` lives in `__DICTIONARYVALUE_<name>_<root>`.

use crate::array::remove_if_exists;
use crate::error::{CoreError, CoreResult};
use crate::path::{companion_path, member_marker, DICTIONARY_DATA, DICTIONARY_VALUE};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cellstore_codec::{
    decode_counter, decode_one_field, encode_counter, push_field, CborCodec, Codec, Utf8Codec,
};
use cellstore_storage::{Cell, CellOptions, OpenMode, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// In-memory image of a map's definitions file.
#[derive(Debug, Clone)]
pub struct Directory<K> {
    /// Next value name to allocate.
    pub counter: u64,
    /// Keys in insertion order.
    pub order: Vec<K>,
    /// Value name of each key.
    pub names: HashMap<K, String>,
}

impl<K> Default for Directory<K> {
    fn default() -> Self {
        Self {
            counter: 0,
            order: Vec::new(),
            names: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> Directory<K> {
    /// Parses definitions text.
    ///
    /// Empty text is an empty directory.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed fields, undecodable keys, a dangling
    /// key without a name, or duplicate keys.
    pub fn parse(text: &str, key_codec: &dyn Codec<K>) -> CoreResult<Self> {
        let mut directory = Self::default();
        if text.is_empty() {
            return Ok(directory);
        }

        let (counter, mut rest) = decode_one_field(text)?;
        directory.counter = decode_counter(counter)?;
        while !rest.is_empty() {
            let (encoded_key, after_key) = decode_one_field(rest)?;
            if after_key.is_empty() {
                return Err(CoreError::corrupted("definitions end with a key but no value name"));
            }
            let (name, after_name) = decode_one_field(after_key)?;
            rest = after_name;

            let bytes = BASE64
                .decode(encoded_key)
                .map_err(|e| CoreError::corrupted(format!("bad key encoding: {e}")))?;
            let key = key_codec.decode(&bytes)?;
            if directory.names.insert(key.clone(), name.to_string()).is_some() {
                return Err(CoreError::corrupted("duplicate key in definitions"));
            }
            directory.order.push(key);
        }
        Ok(directory)
    }

    /// Renders the definitions text.
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be encoded.
    pub fn render(&self, key_codec: &dyn Codec<K>) -> CoreResult<String> {
        let mut text = String::new();
        push_field(&mut text, &encode_counter(self.counter));
        for key in &self.order {
            let name = self
                .names
                .get(key)
                .ok_or_else(|| CoreError::corrupted("key without value name"))?;
            push_field(&mut text, &BASE64.encode(key_codec.encode(key)?));
            push_field(&mut text, name);
        }
        Ok(text)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A map from `K` to `V` with one file per value.
///
/// # Cost
///
/// Every `put` of a new key and every `remove` rewrites the whole
/// definitions file: O(n) in the number of keys. Lookups and overwrites of
/// existing keys are O(1) file operations.
///
/// # Sharing
///
/// In exclusive mode the directory loaded at open time stays authoritative
/// and every value cell is held open. In shared mode each operation first
/// reloads the directory from disk and opens value cells only for the
/// duration of the call. This is polling consistency: the last writer is
/// eventually observed, nothing is isolated or locked.
///
/// # Example
///
/// ```rust
/// use cellstore_core::PersistentMap;
/// use cellstore_storage::CellOptions;
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut scores = PersistentMap::open(dir.path().join("scores"), CellOptions::default()).unwrap();
///
/// scores.put("ada".to_string(), &36u32).unwrap();
/// assert_eq!(scores.get(&"ada".to_string()).unwrap(), 36);
/// assert!(scores.remove(&"ada".to_string()).unwrap());
/// ```
pub struct PersistentMap<K, V> {
    root: PathBuf,
    options: CellOptions,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    definitions: Option<Cell<String>>,
    directory: Directory<K>,
    /// Value cells by name. Exclusive mode only.
    values: HashMap<String, Cell<V>>,
}

impl<K, V> PersistentMap<K, V>
where
    K: Eq + Hash + Clone + Debug + Serialize + DeserializeOwned + 'static,
    V: Clone + Serialize + DeserializeOwned + 'static,
{
    /// Opens the map rooted at `root`, encoding keys and values as CBOR.
    ///
    /// # Errors
    ///
    /// See [`PersistentMap::with_codecs`].
    pub fn open(root: impl AsRef<Path>, options: CellOptions) -> CoreResult<Self> {
        Self::with_codecs(root, options, Arc::new(CborCodec), Arc::new(CborCodec))
    }
}

impl<K, V> PersistentMap<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Opens the map rooted at `root` with explicit codecs.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be opened or parsed, or
    /// (exclusive mode) if a listed value file is missing.
    pub fn with_codecs(
        root: impl AsRef<Path>,
        options: CellOptions,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
    ) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let empty = Directory::<K>::default().render(key_codec.as_ref())?;
        let definitions = Cell::open(
            companion_path(&root, DICTIONARY_DATA),
            options.clone(),
            Some(empty),
            Arc::new(Utf8Codec),
        )?;

        let opened = definitions
            .value()
            .map_err(CoreError::from)
            .and_then(|text| Directory::parse(&text, key_codec.as_ref()))
            .and_then(|directory| {
                let values = if options.is_shared() {
                    HashMap::new()
                } else {
                    open_values(&root, &options, &value_codec, &directory)?
                };
                Ok((directory, values))
            });
        let (directory, values) = match opened {
            Ok(opened) => opened,
            Err(error) => {
                definitions.close()?;
                return Err(error);
            }
        };

        Ok(Self {
            root,
            options,
            key_codec,
            value_codec,
            definitions: Some(definitions),
            directory,
            values,
        })
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Inserts or overwrites the value for `key`.
    ///
    /// Returns true if the key was already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the value or the definitions cannot be written.
    pub fn put(&mut self, key: K, value: &V) -> CoreResult<bool> {
        self.reload()?;
        if let Some(name) = self.directory.names.get(&key) {
            self.write_value(name, value)?;
            return Ok(true);
        }

        let name = encode_counter(self.directory.counter);
        let cell = Cell::create(
            self.value_path(&name),
            value_options(&self.options),
            value.clone(),
            Arc::clone(&self.value_codec),
        )?;
        if self.options.is_shared() {
            cell.close()?;
        } else {
            self.values.insert(name.clone(), cell);
        }

        self.directory.counter += 1;
        self.directory.order.push(key.clone());
        self.directory.names.insert(key, name);
        self.persist()?;
        Ok(false)
    }

    /// Returns the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyNotFound`] if the key is absent.
    pub fn get(&self, key: &K) -> CoreResult<V> {
        self.try_get(key)?
            .ok_or_else(|| CoreError::key_not_found(key))
    }

    /// Returns the value for `key`, or `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be read.
    pub fn try_get(&self, key: &K) -> CoreResult<Option<V>> {
        self.with_directory(|directory| match directory.names.get(key) {
            Some(name) => self.read_value(name).map(Some),
            None => Ok(None),
        })
    }

    /// Returns true if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn contains_key(&self, key: &K) -> CoreResult<bool> {
        self.with_directory(|directory| Ok(directory.names.contains_key(key)))
    }

    /// Removes `key` and deletes its value file.
    ///
    /// Returns true if the key was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be written or the file
    /// cannot be removed.
    pub fn remove(&mut self, key: &K) -> CoreResult<bool> {
        self.reload()?;
        let Some(name) = self.directory.names.remove(key) else {
            return Ok(false);
        };
        self.directory.order.retain(|k| k != key);
        self.persist()?;
        self.delete_value(&name)?;
        Ok(true)
    }

    /// Returns the keys in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn keys(&self) -> CoreResult<Vec<K>> {
        self.with_directory(|directory| Ok(directory.order.clone()))
    }

    /// Returns every `(key, value)` pair in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn entries(&self) -> CoreResult<Vec<(K, V)>> {
        self.with_directory(|directory| {
            directory
                .order
                .iter()
                .map(|key| {
                    let name = &directory.names[key];
                    Ok((key.clone(), self.read_value(name)?))
                })
                .collect()
        })
    }

    /// Returns the number of keys.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn len(&self) -> CoreResult<usize> {
        self.with_directory(|directory| Ok(directory.len()))
    }

    /// Returns true if the map has no keys.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every key. The name counter keeps counting.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be written or a file
    /// cannot be removed.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.reload()?;
        let names: Vec<String> = self.directory.names.drain().map(|(_, name)| name).collect();
        self.directory.order.clear();
        self.persist()?;
        for name in &names {
            self.delete_value(name)?;
        }
        debug!(root = %self.root.display(), removed = names.len(), "cleared map");
        Ok(())
    }

    /// Releases every handle, deleting all files if `delete_on_dispose` is set.
    ///
    /// # Errors
    ///
    /// Returns the first release error.
    pub fn dispose(mut self) -> CoreResult<()> {
        self.release()
    }

    fn with_directory<R>(&self, f: impl FnOnce(&Directory<K>) -> CoreResult<R>) -> CoreResult<R> {
        if self.options.is_shared() {
            let directory = self.load_directory()?;
            f(&directory)
        } else {
            f(&self.directory)
        }
    }

    fn reload(&mut self) -> CoreResult<()> {
        if self.options.is_shared() {
            self.directory = self.load_directory()?;
            trace!(root = %self.root.display(), keys = self.directory.len(), "reloaded map");
        }
        Ok(())
    }

    fn load_directory(&self) -> CoreResult<Directory<K>> {
        let text = self.definitions_cell()?.value()?;
        Directory::parse(&text, self.key_codec.as_ref())
    }

    fn persist(&self) -> CoreResult<()> {
        let text = self.directory.render(self.key_codec.as_ref())?;
        Ok(self.definitions_cell()?.write(&text)?)
    }

    fn definitions_cell(&self) -> CoreResult<&Cell<String>> {
        self.definitions
            .as_ref()
            .ok_or(CoreError::Storage(StorageError::Closed))
    }

    fn value_path(&self, name: &str) -> PathBuf {
        value_path(&self.root, name)
    }

    fn read_value(&self, name: &str) -> CoreResult<V> {
        if self.options.is_shared() {
            let cell = self.open_transient(name)?;
            let value = cell.value()?;
            cell.close()?;
            Ok(value)
        } else {
            Ok(self.held(name)?.value()?)
        }
    }

    fn write_value(&self, name: &str, value: &V) -> CoreResult<()> {
        if self.options.is_shared() {
            let cell = self.open_transient(name)?;
            cell.write(value)?;
            cell.close()?;
            Ok(())
        } else {
            Ok(self.held(name)?.write(value)?)
        }
    }

    fn delete_value(&mut self, name: &str) -> CoreResult<()> {
        match self.values.remove(name) {
            Some(cell) => Ok(cell.delete()?),
            None => remove_if_exists(&self.value_path(name)),
        }
    }

    fn open_transient(&self, name: &str) -> CoreResult<Cell<V>> {
        Ok(Cell::open(
            self.value_path(name),
            value_options(&self.options).mode(OpenMode::Open),
            None,
            Arc::clone(&self.value_codec),
        )?)
    }

    fn held(&self, name: &str) -> CoreResult<&Cell<V>> {
        self.values
            .get(name)
            .ok_or_else(|| CoreError::corrupted(format!("no handle for value {name}")))
    }
}

impl<K, V> PersistentMap<K, V> {
    fn release(&mut self) -> CoreResult<()> {
        let Some(definitions) = self.definitions.take() else {
            return Ok(());
        };
        let values = std::mem::take(&mut self.values);
        let mut first_error: Option<CoreError> = None;

        if self.options.delete_on_dispose {
            for (_, cell) in values {
                if let Err(error) = cell.delete() {
                    first_error.get_or_insert(error.into());
                }
            }
            if self.options.is_shared() {
                for name in self.directory.names.values() {
                    if let Err(error) = remove_if_exists(&value_path(&self.root, name)) {
                        first_error.get_or_insert(error);
                    }
                }
            }
        } else {
            drop(values);
        }

        if let Err(error) = definitions.dispose() {
            first_error.get_or_insert(error.into());
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<K, V> Drop for PersistentMap<K, V> {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!(root = %self.root.display(), %error, "failed to release map");
        }
    }
}

/// Path of the value file called `name` under `root`.
#[must_use]
pub fn value_path(root: &Path, name: &str) -> PathBuf {
    companion_path(root, &member_marker(DICTIONARY_VALUE, name))
}

fn value_options(options: &CellOptions) -> CellOptions {
    options.clone().delete_on_dispose(false)
}

fn open_values<K, V: Clone>(
    root: &Path,
    options: &CellOptions,
    codec: &Arc<dyn Codec<V>>,
    directory: &Directory<K>,
) -> CoreResult<HashMap<String, Cell<V>>> {
    directory
        .names
        .values()
        .map(|name| {
            let cell = Cell::open(
                value_path(root, name),
                value_options(options).mode(OpenMode::Open),
                None,
                Arc::clone(codec),
            )?;
            Ok((name.clone(), cell))
        })
        .collect()
}
