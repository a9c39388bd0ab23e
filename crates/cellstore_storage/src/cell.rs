//! The one-value-one-file persistence primitive.

use crate::error::{StorageError, StorageResult};
use crate::options::{CellOptions, OpenMode, Share};
use cellstore_codec::{Codec, CodecResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A single value persisted as the entire contents of one file.
///
/// The file always holds exactly the codec output for the current value;
/// every write overwrites the whole file and truncates it to the new
/// length.
///
/// # Sharing
///
/// The handle keeps the file open for its whole lifetime and holds an OS
/// lock matching [`Share`]: an exclusive handle conflicts with any other
/// handle on the same file, shared handles only conflict with exclusive
/// ones. A conflicting open fails immediately with
/// [`StorageError::SharingViolation`].
///
/// # Caching
///
/// Decoded values are cached only in exclusive mode with caching enabled.
/// A shared handle reads the file on every call because another process may
/// have rewritten it.
///
/// # Release
///
/// The file handle is released when the cell is dropped, or explicitly with
/// [`Cell::dispose`], [`Cell::close`] or [`Cell::delete`]. With
/// `delete_on_dispose` the file is removed at release time.
///
/// # Example
///
/// ```no_run
/// use cellstore_codec::U64Codec;
/// use cellstore_storage::{Cell, CellOptions};
/// use std::sync::Arc;
///
/// let cell = Cell::open("hits.bin", CellOptions::default(), Some(0u64), Arc::new(U64Codec)).unwrap();
/// let hits = cell.value().unwrap();
/// cell.write(&(hits + 1)).unwrap();
/// ```
pub struct Cell<T> {
    path: PathBuf,
    options: CellOptions,
    codec: Arc<dyn Codec<T>>,
    file: Mutex<Option<File>>,
    cache: Mutex<Option<T>>,
}

impl<T: Clone> Cell<T> {
    /// Opens the cell at `path`.
    ///
    /// If the open mode creates the file, it is immediately written with
    /// `default`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the file is missing and `mode` is [`OpenMode::Open`]
    /// - the file exists and `mode` is [`OpenMode::CreateNew`]
    /// - the file must be created but `default` is `None`, or the access
    ///   mode cannot write it
    /// - `delete_on_dispose` is requested for a pre-existing shared file
    /// - another handle holds the file in a conflicting share mode
    pub fn open(
        path: impl AsRef<Path>,
        options: CellOptions,
        default: Option<T>,
        codec: Arc<dyn Codec<T>>,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();

        let create = match options.mode {
            OpenMode::Open => {
                if !exists {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("cell file not found: {}", path.display()),
                    )
                    .into());
                }
                false
            }
            OpenMode::OpenOrCreate => !exists,
            OpenMode::CreateNew => {
                if exists {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("cell file already exists: {}", path.display()),
                    )
                    .into());
                }
                true
            }
            OpenMode::Create => true,
        };

        if create && !options.access.can_write() {
            return Err(StorageError::invalid_options(format!(
                "creating {} requires write access",
                path.display()
            )));
        }
        if options.delete_on_dispose && !create && options.is_shared() {
            return Err(StorageError::invalid_options(format!(
                "delete_on_dispose on shared pre-existing file {}",
                path.display()
            )));
        }
        let default = if create {
            Some(default.ok_or_else(|| StorageError::MissingDefault { path: path.clone() })?)
        } else {
            None
        };

        if create && options.create_dirs {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let file = open_file(&path, &options, create)?;
        let cell = Self {
            path,
            options,
            codec,
            file: Mutex::new(Some(file)),
            cache: Mutex::new(None),
        };

        if let Some(default) = default {
            cell.store(&default)?;
            debug!(path = %cell.path.display(), "created cell");
        }

        Ok(cell)
    }

    /// Creates (or overwrites) the cell at `path` holding `value`.
    ///
    /// # Errors
    ///
    /// See [`Cell::open`].
    pub fn create(
        path: impl AsRef<Path>,
        options: CellOptions,
        value: T,
        codec: Arc<dyn Codec<T>>,
    ) -> StorageResult<Self> {
        Self::open(path, options.mode(OpenMode::Create), Some(value), codec)
    }

    /// Reads the value, capturing decode failures instead of raising them.
    ///
    /// The outer result carries access and I/O failures; the inner result
    /// carries the decode outcome, which lets callers probe a possibly
    /// corrupt cell.
    ///
    /// # Errors
    ///
    /// Returns an error if the cell lacks read access, is closed, or the
    /// file cannot be read.
    pub fn read(&self) -> StorageResult<CodecResult<T>> {
        if !self.options.access.can_read() {
            return Err(StorageError::AccessDenied {
                path: self.path.clone(),
                operation: "read",
            });
        }

        let caches = self.options.caches();
        if caches {
            if let Some(value) = self.cache.lock().as_ref() {
                trace!(path = %self.path.display(), "cell cache hit");
                return Ok(Ok(value.clone()));
            }
        }

        let bytes = self.load()?;
        let decoded = self.codec.decode(&bytes);
        if caches {
            if let Ok(value) = &decoded {
                *self.cache.lock() = Some(value.clone());
            }
        }
        Ok(decoded)
    }

    /// Reads the value, raising decode failures as [`StorageError::Codec`].
    ///
    /// # Errors
    ///
    /// Everything [`Cell::read`] returns, plus decode failures.
    pub fn value(&self) -> StorageResult<T> {
        Ok(self.read()??)
    }

    /// Overwrites the file with the encoding of `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cell lacks write access, the value cannot be
    /// encoded, or the write fails.
    pub fn write(&self, value: &T) -> StorageResult<()> {
        if !self.options.access.can_write() {
            return Err(StorageError::AccessDenied {
                path: self.path.clone(),
                operation: "write",
            });
        }
        self.store(value)
    }

    fn store(&self, value: &T) -> StorageResult<()> {
        let bytes = self.codec.encode(value)?;
        let caches = self.options.caches();
        if caches {
            *self.cache.lock() = None;
        }

        {
            let mut guard = self.file.lock();
            let file = guard.as_mut().ok_or(StorageError::Closed)?;
            file.set_len(bytes.len() as u64)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&bytes)?;
            if self.options.sync_on_write {
                file.sync_all()?;
            } else {
                file.flush()?;
            }
        }

        if caches {
            *self.cache.lock() = Some(value.clone());
        }
        trace!(path = %self.path.display(), len = bytes.len(), "wrote cell");
        Ok(())
    }

    fn load(&self) -> StorageResult<Vec<u8>> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StorageError::Closed)?;
        file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl<T> Cell<T> {
    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the options the cell was opened with.
    #[must_use]
    pub fn options(&self) -> &CellOptions {
        &self.options
    }

    /// Returns true if a decoded value is currently cached.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cache.lock().is_some()
    }

    /// Releases the handle, deleting the file if `delete_on_dispose` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn dispose(mut self) -> StorageResult<()> {
        self.release()
    }

    /// Releases the handle and keeps the file, whatever `delete_on_dispose` says.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible to match [`Cell::dispose`].
    pub fn close(mut self) -> StorageResult<()> {
        self.options.delete_on_dispose = false;
        self.release()
    }

    /// Releases the handle and removes the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn delete(mut self) -> StorageResult<()> {
        self.options.delete_on_dispose = true;
        self.release()
    }

    fn release(&mut self) -> StorageResult<()> {
        let Some(file) = self.file.get_mut().take() else {
            return Ok(());
        };
        drop(file);
        *self.cache.get_mut() = None;

        if self.options.delete_on_dispose {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "deleted cell"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl<T> Drop for Cell<T> {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!(path = %self.path.display(), %error, "failed to release cell");
        }
    }
}

impl<T> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Opens the OS file with read/write/create flags derived from `options`.
fn base_open_options(options: &CellOptions, create: bool) -> OpenOptions {
    let mut open = OpenOptions::new();
    open.read(true).write(options.access.can_write() || create);
    match options.mode {
        OpenMode::CreateNew => {
            open.create_new(true);
        }
        OpenMode::Create | OpenMode::OpenOrCreate => {
            open.create(true);
        }
        OpenMode::Open => {}
    }
    open
}

/// Opens the file and takes an advisory lock matching the share mode.
#[cfg(not(windows))]
fn open_file(path: &Path, options: &CellOptions, create: bool) -> StorageResult<File> {
    use fs2::FileExt;

    let file = base_open_options(options, create).open(path)?;
    let locked = match options.share {
        Share::Exclusive => FileExt::try_lock_exclusive(&file),
        Share::Shared => FileExt::try_lock_shared(&file),
    };
    match locked {
        Ok(()) => Ok(file),
        Err(source)
            if source.kind() == io::ErrorKind::WouldBlock
                || source.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
        {
            Err(StorageError::SharingViolation {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(source) => Err(StorageError::Io(source)),
    }
}

/// Opens the file with the native share flags.
#[cfg(windows)]
fn open_file(path: &Path, options: &CellOptions, create: bool) -> StorageResult<File> {
    use std::os::windows::fs::OpenOptionsExt;

    const FILE_SHARE_READ: u32 = 0x1;
    const FILE_SHARE_WRITE: u32 = 0x2;
    const FILE_SHARE_DELETE: u32 = 0x4;
    const ERROR_SHARING_VIOLATION: i32 = 32;

    let mut open = base_open_options(options, create);
    open.share_mode(match options.share {
        Share::Exclusive => 0,
        Share::Shared => FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
    });
    open.open(path).map_err(|source| {
        if source.raw_os_error() == Some(ERROR_SHARING_VIOLATION) {
            StorageError::SharingViolation {
                path: path.to_path_buf(),
                source,
            }
        } else {
            StorageError::Io(source)
        }
    })
}
