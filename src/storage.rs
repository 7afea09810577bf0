use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const BACKUP_SUFFIX: &str = ".bak";
pub const TEMP_PREFIX: &str = ".tagscope-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStatus {
    Created(PathBuf),
    Existing(PathBuf),
}

impl BackupStatus {
    pub fn path(&self) -> &Path {
        match self {
            BackupStatus::Created(path) | BackupStatus::Existing(path) => path,
        }
    }
}

/// Filesystem side of an edit.
pub trait FileStore: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Copies the original bytes aside once. An existing backup is left as is.
    fn ensure_backup(&self, path: &Path) -> io::Result<BackupStatus>;

    /// Replaces `path` with `bytes` so readers see either the old or the new file.
    fn replace(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug, Default)]
pub struct FsStore {
    backed_up: Mutex<HashSet<PathBuf>>,
}

impl FsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn already_backed_up(&self, path: &Path) -> bool {
        self.backed_up
            .lock()
            .map(|set| set.contains(path))
            .unwrap_or(false)
    }

    fn remember(&self, path: &Path) {
        if let Ok(mut set) = self.backed_up.lock() {
            set.insert(path.to_path_buf());
        }
    }
}

impl FileStore for FsStore {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn ensure_backup(&self, path: &Path) -> io::Result<BackupStatus> {
        let target = backup_path(path);
        if self.already_backed_up(path) {
            return Ok(BackupStatus::Existing(target));
        }

        let original = fs::read(path)?;
        match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(&original).and_then(|()| file.sync_all()) {
                    // A truncated backup would otherwise block every later attempt.
                    let _ = fs::remove_file(&target);
                    return Err(err);
                }
                self.remember(path);
                log::info!("Backed up {} to {}", path.display(), target.display());
                Ok(BackupStatus::Created(target))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                self.remember(path);
                log::warn!("Keeping existing backup {}", target.display());
                Ok(BackupStatus::Existing(target))
            }
            Err(err) => Err(err),
        }
    }

    fn replace(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(parent)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        if let Ok(metadata) = fs::metadata(path) {
            temp.as_file().set_permissions(metadata.permissions())?;
        }
        temp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}
