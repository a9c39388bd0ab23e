//! A string-keyed map whose member files are named after their keys.
//!
//! The definitions file lists every key followed by `\n`, in insertion
//! order. The value for `key` lives in
//! `__DICTIONARYMEMBER_<hex(key)>_<root>`, so the file name alone identifies
//! the key. Keys may not contain a newline, and the member file name must
//! fit in [`MAX_FILE_NAME`] bytes, which caps keys at about 115 bytes
//! for short root names.

use crate::array::remove_if_exists;
use crate::error::{CoreError, CoreResult};
use crate::path::{companion_path, member_marker, DICTIONARY_DATA, DICTIONARY_MEMBER, MAX_FILE_NAME};
use cellstore_codec::{encode_label, CborCodec, Codec, Utf8Codec};
use cellstore_storage::{Cell, CellOptions, OpenMode, StorageError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Parses definitions text into keys.
///
/// # Errors
///
/// Returns [`CoreError::Corrupted`] if the text does not end with a newline
/// or lists a key twice.
pub fn parse_keys(text: &str) -> CoreResult<Vec<String>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let Some(body) = text.strip_suffix('\n') else {
        return Err(CoreError::corrupted("definitions do not end with a newline"));
    };

    let mut seen = HashSet::new();
    body.split('\n')
        .map(|key| {
            if seen.insert(key) {
                Ok(key.to_string())
            } else {
                Err(CoreError::corrupted(format!("duplicate key {key:?}")))
            }
        })
        .collect()
}

/// Renders keys as definitions text.
#[must_use]
pub fn render_keys(keys: &[String]) -> String {
    let mut text = String::with_capacity(keys.iter().map(|k| k.len() + 1).sum());
    for key in keys {
        text.push_str(key);
        text.push('\n');
    }
    text
}

/// A map from `String` keys to `T` values.
///
/// Each mutation that adds or removes a key rewrites the definitions file.
/// In exclusive mode member handles are opened on first use and kept. In
/// shared mode every operation reloads the key list and opens members only
/// for its own duration; [`PersistentLabeledMap::batch`] suspends the
/// reload so a group of operations sees one snapshot.
///
/// # Example
///
/// ```rust
/// use cellstore_core::PersistentLabeledMap;
/// use cellstore_storage::CellOptions;
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut env = PersistentLabeledMap::open(dir.path().join("env"), CellOptions::default()).unwrap();
///
/// env.put("HOME", &"/root".to_string()).unwrap();
/// assert_eq!(env.keys().unwrap(), vec!["HOME".to_string()]);
/// ```
pub struct PersistentLabeledMap<T> {
    root: PathBuf,
    options: CellOptions,
    codec: Arc<dyn Codec<T>>,
    definitions: Option<Cell<String>>,
    keys: Vec<String>,
    /// Lazily opened member handles. Exclusive mode only.
    members: Mutex<HashMap<String, Cell<T>>>,
    hold: usize,
}

impl<T> PersistentLabeledMap<T>
where
    T: Clone + Serialize + DeserializeOwned + 'static,
{
    /// Opens the map rooted at `root`, encoding values as CBOR.
    ///
    /// # Errors
    ///
    /// See [`PersistentLabeledMap::with_codec`].
    pub fn open(root: impl AsRef<Path>, options: CellOptions) -> CoreResult<Self> {
        Self::with_codec(root, options, Arc::new(CborCodec))
    }
}

impl<T: Clone> PersistentLabeledMap<T> {
    /// Opens the map rooted at `root` with an explicit value codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be opened or parsed.
    pub fn with_codec(
        root: impl AsRef<Path>,
        options: CellOptions,
        codec: Arc<dyn Codec<T>>,
    ) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let definitions = Cell::open(
            companion_path(&root, DICTIONARY_DATA),
            options.clone(),
            Some(String::new()),
            Arc::new(Utf8Codec),
        )?;
        let keys = match definitions
            .value()
            .map_err(CoreError::from)
            .and_then(|text| parse_keys(&text))
        {
            Ok(keys) => keys,
            Err(error) => {
                definitions.close()?;
                return Err(error);
            }
        };
        debug!(root = %root.display(), keys = keys.len(), "opened labeled map");

        Ok(Self {
            root,
            options,
            codec,
            definitions: Some(definitions),
            keys,
            members: Mutex::new(HashMap::new()),
            hold: 0,
        })
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs `f` against one snapshot of the key list.
    ///
    /// Shared-mode reloads are suspended until the outermost batch returns.
    /// Batches nest.
    ///
    /// # Errors
    ///
    /// Returns the reload error or whatever `f` returns.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> CoreResult<R>) -> CoreResult<R> {
        self.reload()?;
        self.hold += 1;
        let result = f(self);
        self.hold -= 1;
        result
    }

    /// Inserts or overwrites the value for `key`.
    ///
    /// Returns true if the key was already present.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] if `key` contains a newline or its
    /// member file name would be too long, or an error if a file cannot be
    /// written.
    pub fn put(&mut self, key: &str, value: &T) -> CoreResult<bool> {
        check_key(&self.root, key)?;
        self.reload()?;
        if self.keys.iter().any(|k| k == key) {
            self.with_member(key, |cell| Ok(cell.write(value)?))?;
            return Ok(true);
        }
        self.create_member(key, value)?;
        self.keys.push(key.to_string());
        self.persist()?;
        Ok(false)
    }

    /// Inserts every pair, rewriting the definitions once.
    ///
    /// Keys are validated before anything is written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for the first bad key, or the first
    /// write error.
    pub fn extend<I>(&mut self, pairs: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (String, T)>,
    {
        let pairs: Vec<(String, T)> = pairs.into_iter().collect();
        for (key, _) in &pairs {
            check_key(&self.root, key)?;
        }

        self.batch(|map| {
            let mut added = false;
            for (key, value) in &pairs {
                if map.keys.iter().any(|k| k == key) {
                    map.with_member(key, |cell| Ok(cell.write(value)?))?;
                } else {
                    map.create_member(key, value)?;
                    map.keys.push(key.clone());
                    added = true;
                }
            }
            if added {
                map.persist()?;
            }
            Ok(())
        })
    }

    /// Returns the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyNotFound`] if the key is absent.
    pub fn get(&self, key: &str) -> CoreResult<T> {
        self.try_get(key)?
            .ok_or_else(|| CoreError::key_not_found(&key))
    }

    /// Returns the value for `key`, or `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the member cannot be read.
    pub fn try_get(&self, key: &str) -> CoreResult<Option<T>> {
        if !self.contains_key(key)? {
            return Ok(None);
        }
        self.with_member(key, |cell| Ok(cell.value()?)).map(Some)
    }

    /// Returns true if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn contains_key(&self, key: &str) -> CoreResult<bool> {
        self.with_keys(|keys| keys.iter().any(|k| k == key))
    }

    /// Removes `key` and deletes its member file.
    ///
    /// Returns true if the key was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be written or the file
    /// cannot be removed.
    pub fn remove(&mut self, key: &str) -> CoreResult<bool> {
        self.reload()?;
        let Some(position) = self.keys.iter().position(|k| k == key) else {
            return Ok(false);
        };
        self.keys.remove(position);
        self.persist()?;
        self.delete_member(key)?;
        Ok(true)
    }

    /// Returns the keys in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn keys(&self) -> CoreResult<Vec<String>> {
        self.with_keys(<[String]>::to_vec)
    }

    /// Returns the values in key order.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn values(&self) -> CoreResult<Vec<T>> {
        self.keys()?
            .iter()
            .map(|key| self.with_member(key, |cell| Ok(cell.value()?)))
            .collect()
    }

    /// Returns every `(key, value)` pair in key order.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn entries(&self) -> CoreResult<Vec<(String, T)>> {
        self.keys()?
            .into_iter()
            .map(|key| {
                let value = self.with_member(&key, |cell| Ok(cell.value()?))?;
                Ok((key, value))
            })
            .collect()
    }

    /// Returns the number of keys.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn len(&self) -> CoreResult<usize> {
        self.with_keys(<[String]>::len)
    }

    /// Returns true if the map has no keys.
    ///
    /// # Errors
    ///
    /// Returns an error if shared definitions cannot be reloaded.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every key and member file.
    ///
    /// # Errors
    ///
    /// Returns an error if the definitions cannot be written or a file
    /// cannot be removed.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.reload()?;
        let keys = std::mem::take(&mut self.keys);
        self.persist()?;
        for key in &keys {
            self.delete_member(key)?;
        }
        debug!(root = %self.root.display(), removed = keys.len(), "cleared labeled map");
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

    fn reload(&mut self) -> CoreResult<()> {
        if self.options.is_shared() && self.hold == 0 {
            self.keys = self.load_keys()?;
            trace!(root = %self.root.display(), keys = self.keys.len(), "reloaded labeled map");
        }
        Ok(())
    }

    fn with_keys<R>(&self, f: impl FnOnce(&[String]) -> R) -> CoreResult<R> {
        if self.options.is_shared() && self.hold == 0 {
            Ok(f(self.load_keys()?.as_slice()))
        } else {
            Ok(f(&self.keys))
        }
    }

    fn load_keys(&self) -> CoreResult<Vec<String>> {
        parse_keys(&self.definitions_cell()?.value()?)
    }

    fn persist(&self) -> CoreResult<()> {
        Ok(self.definitions_cell()?.write(&render_keys(&self.keys))?)
    }

    fn definitions_cell(&self) -> CoreResult<&Cell<String>> {
        self.definitions
            .as_ref()
            .ok_or(CoreError::Storage(StorageError::Closed))
    }

    fn with_member<R>(&self, key: &str, f: impl FnOnce(&Cell<T>) -> CoreResult<R>) -> CoreResult<R> {
        if self.options.is_shared() {
            let cell = self.open_member(key)?;
            let result = f(&cell);
            let closed = cell.close();
            let value = result?;
            closed?;
            return Ok(value);
        }

        let mut members = self.members.lock();
        let cell = match members.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.open_member(key)?),
        };
        f(cell)
    }

    fn open_member(&self, key: &str) -> CoreResult<Cell<T>> {
        Ok(Cell::open(
            member_path(&self.root, key),
            member_options(&self.options).mode(OpenMode::Open),
            None,
            Arc::clone(&self.codec),
        )?)
    }

    fn create_member(&self, key: &str, value: &T) -> CoreResult<()> {
        let cell = Cell::create(
            member_path(&self.root, key),
            member_options(&self.options),
            value.clone(),
            Arc::clone(&self.codec),
        )?;
        if self.options.is_shared() {
            cell.close()?;
        } else {
            self.members.lock().insert(key.to_string(), cell);
        }
        Ok(())
    }

    fn delete_member(&self, key: &str) -> CoreResult<()> {
        let held = self.members.lock().remove(key);
        match held {
            Some(cell) => Ok(cell.delete()?),
            None => remove_if_exists(&member_path(&self.root, key)),
        }
    }
}

impl<T> PersistentLabeledMap<T> {
    fn release(&mut self) -> CoreResult<()> {
        let Some(definitions) = self.definitions.take() else {
            return Ok(());
        };
        drop(std::mem::take(self.members.get_mut()));
        let mut first_error: Option<CoreError> = None;

        // Members are opened lazily, so every listed key is removed by path.
        if self.options.delete_on_dispose {
            for key in &self.keys {
                if let Err(error) = remove_if_exists(&member_path(&self.root, key)) {
                    first_error.get_or_insert(error);
                }
            }
        }

        if let Err(error) = definitions.dispose() {
            first_error.get_or_insert(error.into());
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<T> Drop for PersistentLabeledMap<T> {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!(root = %self.root.display(), %error, "failed to release labeled map");
        }
    }
}

/// Path of the member file for `key` under `root`.
#[must_use]
pub fn member_path(root: &Path, key: &str) -> PathBuf {
    companion_path(root, &member_marker(DICTIONARY_MEMBER, &encode_label(key)))
}

fn member_options(options: &CellOptions) -> CellOptions {
    options.clone().delete_on_dispose(false)
}

fn check_key(root: &Path, key: &str) -> CoreResult<()> {
    if key.contains('\n') {
        return Err(CoreError::InvalidKey {
            key: key.to_string(),
            reason: "keys may not contain a newline".to_string(),
        });
    }
    let name_len = member_path(root, key).file_name().map_or(0, |name| name.len());
    if name_len > MAX_FILE_NAME {
        return Err(CoreError::InvalidKey {
            key: key.to_string(),
            reason: format!("member file name is {name_len} bytes, the limit is {MAX_FILE_NAME}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn open_map(root: &Path, options: CellOptions) -> PersistentLabeledMap<u32> {
        PersistentLabeledMap::open(root, options).unwrap()
    }

    #[test]
    fn member_file_is_named_by_hex_key() {
        let dir = tempdir().unwrap();
        let mut map = open_map(&dir.path().join("l"), CellOptions::default());
        map.put("key", &1).unwrap();

        assert!(dir.path().join("__DICTIONARYMEMBER_6b6579_l").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("__DICTIONARY_DATA_l")).unwrap(),
            "key\n"
        );
    }

    #[test]
    fn newline_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let mut map = open_map(&dir.path().join("l"), CellOptions::default());

        assert!(matches!(map.put("a\nb", &1), Err(CoreError::InvalidKey { .. })));
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn keys_too_long_for_a_file_name_are_rejected() {
        let dir = tempdir().unwrap();
        let mut map = open_map(&dir.path().join("l"), CellOptions::default());

        // 19 marker bytes, 2 per key byte, then "_l".
        let longest = "k".repeat((MAX_FILE_NAME - 21) / 2);
        map.put(&longest, &1).unwrap();

        let too_long = "k".repeat(130);
        assert!(matches!(map.put(&too_long, &2), Err(CoreError::InvalidKey { .. })));
        let batch = vec![("ok".to_string(), 3), (too_long, 4)];
        assert!(matches!(map.extend(batch), Err(CoreError::InvalidKey { .. })));
        assert_eq!(map.keys().unwrap(), vec![longest]);
    }

    #[test]
    fn unusual_keys_round_trip() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("l");
        let keys = ["", "with space", "slash/and\\back", "ünïcödé", "tab\there"];
        {
            let mut map = open_map(&root, CellOptions::default());
            for (i, key) in keys.iter().enumerate() {
                map.put(key, &(i as u32)).unwrap();
            }
        }

        let map = open_map(&root, CellOptions::default());
        assert_eq!(map.keys().unwrap(), keys.map(String::from).to_vec());
        assert_eq!(map.get("ünïcödé").unwrap(), 3);
    }

    #[test]
    fn put_overwrites_and_reports_presence() {
        let dir = tempdir().unwrap();
        let mut map = open_map(&dir.path().join("l"), CellOptions::default());

        assert!(!map.put("a", &1).unwrap());
        assert!(map.put("a", &2).unwrap());
        assert_eq!(map.entries().unwrap(), vec![("a".to_string(), 2)]);
    }

    #[test]
    fn remove_and_missing_keys() {
        let dir = tempdir().unwrap();
        let mut map = open_map(&dir.path().join("l"), CellOptions::default());
        map.put("a", &1).unwrap();
        map.put("b", &2).unwrap();

        assert!(map.remove("a").unwrap());
        assert!(!map.remove("a").unwrap());
        assert!(!dir.path().join("__DICTIONARYMEMBER_61_l").exists());
        assert!(matches!(map.get("a"), Err(CoreError::KeyNotFound { .. })));
        assert_eq!(map.values().unwrap(), vec![2]);
    }

    #[test]
    fn extend_writes_definitions_once() {
        let dir = tempdir().unwrap();
        let mut map = open_map(&dir.path().join("l"), CellOptions::default());
        map.put("a", &0).unwrap();

        map.extend(vec![("a".to_string(), 1), ("b".to_string(), 2)]).unwrap();
        assert_eq!(map.entries().unwrap(), vec![("a".to_string(), 1), ("b".to_string(), 2)]);

        let bad = map.extend(vec![("c".to_string(), 3), ("d\n".to_string(), 4)]);
        assert!(matches!(bad, Err(CoreError::InvalidKey { .. })));
        assert!(!map.contains_key("c").unwrap());
    }

    #[test]
    fn shared_batch_sees_one_snapshot() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("l");
        let mut a = open_map(&root, CellOptions::shared());
        let mut b = open_map(&root, CellOptions::shared());

        a.put("x", &1).unwrap();
        a.batch(|a| {
            b.put("y", &2).unwrap();
            assert!(!a.contains_key("y")?);
            Ok(())
        })
        .unwrap();
        assert!(a.contains_key("y").unwrap());
        assert_eq!(a.get("y").unwrap(), 2);
    }

    #[test]
    fn clear_removes_every_member() {
        let dir = tempdir().unwrap();
        let mut map = open_map(&dir.path().join("l"), CellOptions::default());
        map.put("a", &1).unwrap();
        map.put("b", &2).unwrap();
        map.get("a").unwrap();

        map.clear().unwrap();
        assert!(map.is_empty().unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn dispose_with_delete_removes_unopened_members() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("l");
        {
            let mut map = open_map(&root, CellOptions::default());
            map.put("a", &1).unwrap();
            map.put("b", &2).unwrap();
        }

        let map = open_map(&root, CellOptions::new().delete_on_dispose(true));
        map.dispose().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn parse_requires_trailing_newline() {
        assert!(parse_keys("a\nb").is_err());
        assert!(parse_keys("a\na\n").is_err());
        assert_eq!(parse_keys("\n").unwrap(), vec![String::new()]);
        assert_eq!(render_keys(&["a".into(), "b".into()]), "a\nb\n");
    }
}
