//! A dynamic array stored as one file per element.
//!
//! ```text
//! __ARRAYDATA_<name>            length: u64 LE | offset: u64 LE
//! __ARRAYMEMBER_<i>_<name>      element at backing index i
//! ```
//!
//! Logical element `i` lives at backing index `offset + i`. Removing the
//! first element bumps `offset`; inserting at the front consumes it. When no
//! front slack is left, a reindex renames every backing file upward by
//! `max(1, length / 4)`, which keeps front inserts amortized O(1).

use crate::error::{CoreError, CoreResult};
use crate::path::{companion_path, member_marker, ARRAY_DATA, ARRAY_MEMBER};
use cellstore_codec::{CborCodec, Codec, CodecError, CodecResult};
use cellstore_storage::{Cell, CellOptions, OpenMode, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Size of the metadata file in bytes.
pub const METADATA_SIZE: usize = 16;

/// Length and front offset of a persistent array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrayMetadata {
    /// Number of live elements.
    pub length: u64,
    /// Backing index of logical element 0.
    pub offset: u64,
}

impl ArrayMetadata {
    /// Returns the backing index of logical element `index`.
    #[must_use]
    pub const fn backing_index(&self, index: u64) -> u64 {
        self.offset + index
    }
}

/// Fixed 16-byte layout for [`ArrayMetadata`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataCodec;

impl Codec<ArrayMetadata> for MetadataCodec {
    fn encode(&self, value: &ArrayMetadata) -> CodecResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(METADATA_SIZE);
        bytes.extend_from_slice(&value.length.to_le_bytes());
        bytes.extend_from_slice(&value.offset.to_le_bytes());
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<ArrayMetadata> {
        if bytes.len() != METADATA_SIZE {
            return Err(CodecError::LengthMismatch {
                expected: METADATA_SIZE,
                actual: bytes.len(),
            });
        }
        let (length, offset) = bytes.split_at(8);
        let word = |b: &[u8]| -> CodecResult<u64> {
            b.try_into()
                .map(u64::from_le_bytes)
                .map_err(|_| CodecError::invalid_structure("metadata word"))
        };
        Ok(ArrayMetadata {
            length: word(length)?,
            offset: word(offset)?,
        })
    }
}

/// Counters describing reindex work done by this handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayStats {
    /// Number of reindex passes.
    pub reindexes: u64,
    /// Number of backing files renamed across all passes.
    pub renames: u64,
}

/// An ordered sequence of values, one file per element.
///
/// # Complexity
///
/// - `get`, `set`: O(1)
/// - insert/remove at either end: amortized O(1)
/// - insert/remove elsewhere: O(n) value copies
///
/// # Sharing
///
/// In exclusive mode the handle keeps every element cell open and trusts
/// its in-memory metadata. In shared mode it reloads the metadata before
/// every operation and opens element cells only for the duration of the
/// call. Another process's changes become visible on the next call; there
/// is no locking beyond the OS share mode, so concurrent writers race.
///
/// # Example
///
/// ```rust
/// use cellstore_core::PersistentArray;
/// use cellstore_storage::CellOptions;
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut queue = PersistentArray::open(dir.path().join("queue"), CellOptions::default()).unwrap();
///
/// queue.push("b".to_string()).unwrap();
/// queue.insert(0, "a".to_string()).unwrap();
/// assert_eq!(queue.to_vec().unwrap(), ["a", "b"]);
/// assert_eq!(queue.pop_front().unwrap(), Some("a".to_string()));
/// ```
pub struct PersistentArray<T> {
    root: PathBuf,
    options: CellOptions,
    codec: Arc<dyn Codec<T>>,
    metadata: Option<Cell<ArrayMetadata>>,
    meta: ArrayMetadata,
    /// Element handles in logical order. Exclusive mode only.
    elements: VecDeque<Cell<T>>,
    stats: ArrayStats,
}

impl<T> PersistentArray<T>
where
    T: Clone + Serialize + DeserializeOwned + 'static,
{
    /// Opens the array rooted at `root` using the CBOR codec.
    ///
    /// # Errors
    ///
    /// See [`PersistentArray::with_codec`].
    pub fn open(root: impl AsRef<Path>, options: CellOptions) -> CoreResult<Self> {
        Self::with_codec(root, options, Arc::new(CborCodec))
    }
}

impl<T: Clone> PersistentArray<T> {
    /// Opens the array rooted at `root`, creating an empty one if the open
    /// mode allows.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cell cannot be opened or decoded,
    /// or (exclusive mode) if an element file is missing.
    pub fn with_codec(
        root: impl AsRef<Path>,
        options: CellOptions,
        codec: Arc<dyn Codec<T>>,
    ) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let metadata = Cell::open(
            companion_path(&root, ARRAY_DATA),
            options.clone(),
            Some(ArrayMetadata::default()),
            Arc::new(MetadataCodec),
        )?;

        // Close rather than drop on failure: dropping honours delete_on_dispose.
        let opened = metadata.value().map_err(CoreError::from).and_then(|meta| {
            let elements = if options.is_shared() {
                VecDeque::new()
            } else {
                open_handles(&root, &options, &codec, meta)?
            };
            Ok((meta, elements))
        });
        let (meta, elements) = match opened {
            Ok(opened) => opened,
            Err(error) => {
                metadata.close()?;
                return Err(error);
            }
        };

        Ok(Self {
            root,
            options,
            codec,
            metadata: Some(metadata),
            meta,
            elements,
            stats: ArrayStats::default(),
        })
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the reindex counters of this handle.
    #[must_use]
    pub fn stats(&self) -> ArrayStats {
        self.stats
    }

    /// Returns the current metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if shared metadata cannot be reloaded.
    pub fn metadata(&self) -> CoreResult<ArrayMetadata> {
        self.current()
    }

    /// Returns the number of elements.
    ///
    /// # Errors
    ///
    /// Returns an error if shared metadata cannot be reloaded.
    pub fn len(&self) -> CoreResult<u64> {
        Ok(self.current()?.length)
    }

    /// Returns true if the array has no elements.
    ///
    /// # Errors
    ///
    /// Returns an error if shared metadata cannot be reloaded.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `index >= len`.
    pub fn get(&self, index: u64) -> CoreResult<T> {
        let meta = self.current()?;
        check_index(index, meta.length)?;
        self.read_slot(meta, index)
    }

    /// Replaces the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `index >= len`.
    pub fn set(&mut self, index: u64, value: &T) -> CoreResult<()> {
        self.check_writable()?;
        self.reload()?;
        check_index(index, self.meta.length)?;
        self.write_slot(index, value)
    }

    /// Inserts `value` at `index`, shifting later elements up.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `index > len`.
    pub fn insert(&mut self, index: u64, value: T) -> CoreResult<()> {
        self.reload()?;
        self.insert_loaded(index, value)
    }

    /// Appends `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the element cannot be created.
    pub fn push(&mut self, value: T) -> CoreResult<()> {
        self.reload()?;
        self.insert_loaded(self.meta.length, value)
    }

    /// Prepends `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the element cannot be created.
    pub fn push_front(&mut self, value: T) -> CoreResult<()> {
        self.insert(0, value)
    }

    /// Removes and returns the element at `index`, shifting later elements
    /// down.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `index >= len`.
    pub fn remove_at(&mut self, index: u64) -> CoreResult<T> {
        self.reload()?;
        self.remove_loaded(index)
    }

    /// Removes and returns the last element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element cannot be read or deleted.
    pub fn pop(&mut self) -> CoreResult<Option<T>> {
        self.reload()?;
        match self.meta.length {
            0 => Ok(None),
            len => self.remove_loaded(len - 1).map(Some),
        }
    }

    /// Removes and returns the first element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element cannot be read or deleted.
    pub fn pop_front(&mut self) -> CoreResult<Option<T>> {
        self.reload()?;
        if self.meta.length == 0 {
            return Ok(None);
        }
        self.remove_loaded(0).map(Some)
    }

    /// Deletes every element and resets the metadata to `(0, 0)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be written or a file cannot
    /// be removed.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.check_writable()?;
        self.reload()?;
        let old = self.meta;
        self.meta = ArrayMetadata::default();
        self.persist_meta()?;

        if self.options.is_shared() {
            for backing in old.offset..old.offset + old.length {
                remove_if_exists(&self.element_path(backing))?;
            }
        } else {
            for cell in std::mem::take(&mut self.elements) {
                cell.delete()?;
            }
        }
        debug!(root = %self.root.display(), removed = old.length, "cleared array");
        Ok(())
    }

    /// Reads every element in order.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn to_vec(&self) -> CoreResult<Vec<T>> {
        let meta = self.current()?;
        (0..meta.length).map(|i| self.read_slot(meta, i)).collect()
    }

    /// Reloads the metadata from disk and reopens every element handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata or an element cannot be opened.
    pub fn refresh(&mut self) -> CoreResult<()> {
        self.meta = self.meta_cell()?.value()?;
        if !self.options.is_shared() {
            self.close_elements()?;
            self.open_elements()?;
        }
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

    fn insert_loaded(&mut self, index: u64, value: T) -> CoreResult<()> {
        self.check_writable()?;
        let len = self.meta.length;
        if index > len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }

        if index == 0 && len > 0 {
            if self.meta.offset == 0 {
                self.reindex()?;
            }
            let backing = self.meta.offset - 1;
            let cell = self.create_element(backing, value)?;
            if let Some(cell) = cell {
                self.elements.push_front(cell);
            }
            self.meta = ArrayMetadata {
                length: len + 1,
                offset: backing,
            };
            return self.persist_meta();
        }

        let backing = self.meta.backing_index(len);
        if index == len {
            let cell = self.create_element(backing, value)?;
            if let Some(cell) = cell {
                self.elements.push_back(cell);
            }
            self.meta.length = len + 1;
            return self.persist_meta();
        }

        let tail = self.read_slot(self.meta, len - 1)?;
        let cell = self.create_element(backing, tail)?;
        if let Some(cell) = cell {
            self.elements.push_back(cell);
        }
        self.meta.length = len + 1;
        self.persist_meta()?;

        for slot in (index + 1..len).rev() {
            let moved = self.read_slot(self.meta, slot - 1)?;
            self.write_slot(slot, &moved)?;
        }
        self.write_slot(index, &value)
    }

    fn remove_loaded(&mut self, index: u64) -> CoreResult<T> {
        self.check_writable()?;
        let len = self.meta.length;
        check_index(index, len)?;
        let removed = self.read_slot(self.meta, index)?;

        if index == 0 {
            let backing = self.meta.offset;
            self.meta = ArrayMetadata {
                length: len - 1,
                offset: backing + 1,
            };
            self.persist_meta()?;
            match self.elements.pop_front() {
                Some(cell) => cell.delete()?,
                None => remove_if_exists(&self.element_path(backing))?,
            }
            return Ok(removed);
        }

        for slot in index..len - 1 {
            let moved = self.read_slot(self.meta, slot + 1)?;
            self.write_slot(slot, &moved)?;
        }
        let last = self.meta.backing_index(len - 1);
        self.meta.length = len - 1;
        self.persist_meta()?;
        match self.elements.pop_back() {
            Some(cell) => cell.delete()?,
            None => remove_if_exists(&self.element_path(last))?,
        }
        Ok(removed)
    }

    /// Renames every backing file up by `max(1, length / 4)` to create
    /// front slack.
    ///
    /// If a rename or the metadata write fails, the files already moved are
    /// renamed back so the stored metadata still describes them.
    fn reindex(&mut self) -> CoreResult<()> {
        let ArrayMetadata { length, offset } = self.meta;
        let shift = (length / 4).max(1);

        self.close_elements()?;
        // Descending so a rename never lands on a file still to be moved.
        let mut moved = 0;
        let mut outcome: CoreResult<()> = Ok(());
        for backing in (offset..offset + length).rev() {
            if let Err(error) = fs::rename(self.element_path(backing), self.element_path(backing + shift)) {
                outcome = Err(error.into());
                break;
            }
            moved += 1;
        }
        if outcome.is_ok() {
            self.meta.offset = offset + shift;
            outcome = self.persist_meta();
            if outcome.is_err() {
                self.meta.offset = offset;
            }
        }
        self.stats.renames += moved;

        if let Err(error) = outcome {
            self.unshift(offset + length - moved..offset + length, shift);
            if !self.options.is_shared() {
                self.open_elements()?;
            }
            return Err(error);
        }
        self.stats.reindexes += 1;

        if !self.options.is_shared() {
            self.open_elements()?;
        }
        debug!(root = %self.root.display(), length, shift, "reindexed array");
        Ok(())
    }

    /// Moves the files of `range`, currently `shift` slots up, back down.
    fn unshift(&mut self, range: std::ops::Range<u64>, shift: u64) {
        // Ascending so each target has already been vacated.
        for backing in range {
            if let Err(error) = fs::rename(self.element_path(backing + shift), self.element_path(backing)) {
                warn!(root = %self.root.display(), backing, %error, "failed to undo reindex rename");
            } else {
                self.stats.renames += 1;
            }
        }
    }

    /// Refuses mutation on a handle opened without write access.
    fn check_writable(&self) -> CoreResult<()> {
        if self.options.access.can_write() {
            Ok(())
        } else {
            Err(StorageError::AccessDenied {
                path: companion_path(&self.root, ARRAY_DATA),
                operation: "write",
            }
            .into())
        }
    }

    fn current(&self) -> CoreResult<ArrayMetadata> {
        if self.options.is_shared() {
            Ok(self.meta_cell()?.value()?)
        } else {
            Ok(self.meta)
        }
    }

    fn reload(&mut self) -> CoreResult<()> {
        if self.options.is_shared() {
            self.meta = self.meta_cell()?.value()?;
        }
        Ok(())
    }

    fn meta_cell(&self) -> CoreResult<&Cell<ArrayMetadata>> {
        self.metadata
            .as_ref()
            .ok_or(CoreError::Storage(StorageError::Closed))
    }

    fn persist_meta(&self) -> CoreResult<()> {
        Ok(self.meta_cell()?.write(&self.meta)?)
    }

    fn element_path(&self, backing: u64) -> PathBuf {
        element_path(&self.root, backing)
    }

    fn open_elements(&mut self) -> CoreResult<()> {
        self.elements = open_handles(&self.root, &self.options, &self.codec, self.meta)?;
        Ok(())
    }

    /// Releases held element handles without deleting their files.
    fn close_elements(&mut self) -> CoreResult<()> {
        let mut first_error = None;
        for cell in std::mem::take(&mut self.elements) {
            if let Err(error) = cell.close() {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    fn create_element(&self, backing: u64, value: T) -> CoreResult<Option<Cell<T>>> {
        let path = self.element_path(backing);
        if self.options.is_shared() {
            let cell = Cell::create(path, element_options(&self.options), value, Arc::clone(&self.codec))?;
            cell.close()?;
            Ok(None)
        } else {
            let cell = Cell::create(path, element_options(&self.options), value, Arc::clone(&self.codec))?;
            Ok(Some(cell))
        }
    }

    fn read_slot(&self, meta: ArrayMetadata, index: u64) -> CoreResult<T> {
        if self.options.is_shared() {
            let cell = self.open_transient(meta.backing_index(index))?;
            let value = cell.value()?;
            cell.close()?;
            Ok(value)
        } else {
            Ok(self.held(index)?.value()?)
        }
    }

    fn write_slot(&self, index: u64, value: &T) -> CoreResult<()> {
        if self.options.is_shared() {
            let cell = self.open_transient(self.meta.backing_index(index))?;
            cell.write(value)?;
            cell.close()?;
            Ok(())
        } else {
            Ok(self.held(index)?.write(value)?)
        }
    }

    fn open_transient(&self, backing: u64) -> CoreResult<Cell<T>> {
        Ok(Cell::open(
            self.element_path(backing),
            element_options(&self.options).mode(OpenMode::Open),
            None,
            Arc::clone(&self.codec),
        )?)
    }

    fn held(&self, index: u64) -> CoreResult<&Cell<T>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.elements.get(i))
            .ok_or_else(|| CoreError::corrupted(format!("no element handle for index {index}")))
    }
}

impl<T> PersistentArray<T> {
    fn release(&mut self) -> CoreResult<()> {
        let Some(metadata) = self.metadata.take() else {
            return Ok(());
        };
        let elements = std::mem::take(&mut self.elements);
        let mut first_error: Option<CoreError> = None;

        if self.options.delete_on_dispose {
            for cell in elements {
                if let Err(error) = cell.delete() {
                    first_error.get_or_insert(error.into());
                }
            }
            if self.options.is_shared() {
                let meta = metadata.value().unwrap_or(self.meta);
                for backing in meta.offset..meta.offset + meta.length {
                    if let Err(error) = remove_if_exists(&element_path(&self.root, backing)) {
                        first_error.get_or_insert(error);
                    }
                }
            }
        } else {
            drop(elements);
        }

        if let Err(error) = metadata.dispose() {
            first_error.get_or_insert(error.into());
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<T> Drop for PersistentArray<T> {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!(root = %self.root.display(), %error, "failed to release array");
        }
    }
}

/// Path of the element file at `backing` under `root`.
#[must_use]
pub fn element_path(root: &Path, backing: u64) -> PathBuf {
    companion_path(root, &member_marker(ARRAY_MEMBER, &backing.to_string()))
}

/// Element cells never delete themselves; the array removes their files
/// explicitly, so a failed open cannot destroy data.
fn element_options(options: &CellOptions) -> CellOptions {
    options.clone().delete_on_dispose(false)
}

fn open_handles<T: Clone>(
    root: &Path,
    options: &CellOptions,
    codec: &Arc<dyn Codec<T>>,
    meta: ArrayMetadata,
) -> CoreResult<VecDeque<Cell<T>>> {
    (0..meta.length)
        .map(|index| {
            Ok(Cell::open(
                element_path(root, meta.backing_index(index)),
                element_options(options).mode(OpenMode::Open),
                None,
                Arc::clone(codec),
            )?)
        })
        .collect()
}

fn check_index(index: u64, len: u64) -> CoreResult<()> {
    if index < len {
        Ok(())
    } else {
        Err(CoreError::IndexOutOfRange { index, len })
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
