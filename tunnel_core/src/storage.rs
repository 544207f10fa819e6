//! External storage backing the diagnostic log files.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Mount state of the external storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    /// Mounted with read/write access
    Mounted,
    /// Mounted, but writes are not allowed
    MountedReadOnly,
    /// Not present
    Unmounted,
}

impl StorageState {
    /// Whether log files may be written.
    pub fn is_writable(self) -> bool {
        matches!(self, StorageState::Mounted)
    }
}

impl fmt::Display for StorageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageState::Mounted => write!(f, "mounted"),
            StorageState::MountedReadOnly => write!(f, "read-only"),
            StorageState::Unmounted => write!(f, "unmounted"),
        }
    }
}

/// Storage that holds application files outside the private data area.
pub trait ExternalStorage: Send + Sync {
    /// Current mount state.
    fn state(&self) -> StorageState;

    /// Directory for application files, or `None` if it cannot be resolved.
    fn files_dir(&self) -> Option<PathBuf>;

    /// Open `path` for appending, creating it if needed.
    fn open_report(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(file))
    }
}

/// [`ExternalStorage`] rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
    files_subdir: PathBuf,
}

impl DirectoryStorage {
    /// Storage whose files directory is `root` itself.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryStorage {
            root: root.into(),
            files_subdir: PathBuf::new(),
        }
    }

    /// Storage whose files directory is `root/subdir`, created on demand.
    pub fn with_files_subdir(root: impl Into<PathBuf>, subdir: impl Into<PathBuf>) -> Self {
        DirectoryStorage {
            root: root.into(),
            files_subdir: subdir.into(),
        }
    }

    /// Platform default: `<data_local_dir>/tunnel_core/files`.
    pub fn default_location() -> Option<Self> {
        dirs::data_local_dir().map(|dir| Self::with_files_subdir(dir.join("tunnel_core"), "files"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ExternalStorage for DirectoryStorage {
    fn state(&self) -> StorageState {
        match fs::metadata(&self.root) {
            Ok(meta) if !meta.is_dir() => StorageState::Unmounted,
            Ok(meta) if meta.permissions().readonly() => StorageState::MountedReadOnly,
            Ok(_) => StorageState::Mounted,
            Err(_) => StorageState::Unmounted,
        }
    }

    fn files_dir(&self) -> Option<PathBuf> {
        let dir = self.root.join(&self.files_subdir);
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "Unable to create external files directory");
            return None;
        }
        Some(dir)
    }
}
