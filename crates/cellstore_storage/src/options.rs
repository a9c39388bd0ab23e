//! Cell open options.

/// Which operations a cell handle may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Reads only.
    Read,
    /// Writes only.
    Write,
    /// Reads and writes.
    ReadWrite,
}

impl Access {
    /// Returns true if reads are allowed.
    #[must_use]
    pub const fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Returns true if writes are allowed.
    #[must_use]
    pub const fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Whether other handles may open the same file concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Share {
    /// No other handle may hold the file.
    Exclusive,
    /// Other shared handles may read and write the file.
    Shared,
}

/// How to treat an existing or missing file at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// The file must already exist.
    Open,
    /// Open the file, creating it with the default value if missing.
    OpenOrCreate,
    /// The file must not exist; it is created with the default value.
    CreateNew,
    /// Create the file, overwriting any existing content with the default.
    Create,
}

impl OpenMode {
    /// Returns true if this mode may create the file.
    #[must_use]
    pub const fn may_create(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Options for opening a cell.
///
/// Composite structures take one `CellOptions` and derive the options of
/// all their child cells from it.
#[derive(Debug, Clone)]
pub struct CellOptions {
    /// Read/write capability.
    pub access: Access,

    /// Share mode; gates caching and reload-before-operate.
    pub share: Share,

    /// Creation behavior.
    pub mode: OpenMode,

    /// Whether decoded values may be cached in memory.
    ///
    /// Only honored in [`Share::Exclusive`] mode.
    pub caching: bool,

    /// Whether the file is removed when the handle is released.
    pub delete_on_dispose: bool,

    /// Whether every write is followed by `sync_all`.
    pub sync_on_write: bool,

    /// Whether missing parent directories are created.
    pub create_dirs: bool,
}

impl Default for CellOptions {
    fn default() -> Self {
        Self {
            access: Access::ReadWrite,
            share: Share::Exclusive,
            mode: OpenMode::OpenOrCreate,
            caching: true,
            delete_on_dispose: false,
            sync_on_write: true,
            create_dirs: true,
        }
    }
}

impl CellOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default options with [`Share::Shared`].
    #[must_use]
    pub fn shared() -> Self {
        Self::default().share(Share::Shared)
    }

    /// Sets the access capability.
    #[must_use]
    pub const fn access(mut self, value: Access) -> Self {
        self.access = value;
        self
    }

    /// Sets the share mode.
    #[must_use]
    pub const fn share(mut self, value: Share) -> Self {
        self.share = value;
        self
    }

    /// Sets the open mode.
    #[must_use]
    pub const fn mode(mut self, value: OpenMode) -> Self {
        self.mode = value;
        self
    }

    /// Sets whether caching is allowed.
    #[must_use]
    pub const fn caching(mut self, value: bool) -> Self {
        self.caching = value;
        self
    }

    /// Sets whether the file is deleted on dispose.
    #[must_use]
    pub const fn delete_on_dispose(mut self, value: bool) -> Self {
        self.delete_on_dispose = value;
        self
    }

    /// Sets whether writes are synced to disk.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets whether parent directories are created.
    #[must_use]
    pub const fn create_dirs(mut self, value: bool) -> Self {
        self.create_dirs = value;
        self
    }

    /// Returns true if a cell opened with these options caches values.
    #[must_use]
    pub const fn caches(&self) -> bool {
        self.caching && matches!(self.share, Share::Exclusive)
    }

    /// Returns true if other processes may mutate files behind our back.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        matches!(self.share, Share::Shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = CellOptions::default();
        assert_eq!(options.access, Access::ReadWrite);
        assert_eq!(options.share, Share::Exclusive);
        assert_eq!(options.mode, OpenMode::OpenOrCreate);
        assert!(options.caches());
        assert!(!options.delete_on_dispose);
    }

    #[test]
    fn shared_never_caches() {
        let options = CellOptions::shared().caching(true);
        assert!(!options.caches());
        assert!(options.is_shared());
    }

    #[test]
    fn builder_pattern() {
        let options = CellOptions::new()
            .access(Access::Read)
            .mode(OpenMode::Open)
            .sync_on_write(false);
        assert!(options.access.can_read());
        assert!(!options.access.can_write());
        assert!(!options.mode.may_create());
        assert!(!options.sync_on_write);
    }
}
