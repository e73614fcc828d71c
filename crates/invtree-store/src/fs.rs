//! Small filesystem helpers: atomic writes, tolerant reads and advisory
//! locks.

use crate::error::{Result, StoreError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".new");
    path.with_file_name(name)
}

/// Write through a temporary sibling and rename it into place, creating
/// missing parent directories.
pub(crate) fn save_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = temp_path(path);
    let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

pub(crate) fn save_text(path: &Path, text: &str) -> Result<()> {
    save_bytes(path, text.as_bytes())
}

/// File contents, or `None` if the file is missing or empty.
pub(crate) fn load_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

pub(crate) fn load_text(path: &Path) -> Result<Option<String>> {
    match load_bytes(path)? {
        Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
            StoreError::malformed(format!("{} is not UTF-8: {}", path.display(), e))
        }),
        None => Ok(None),
    }
}

pub(crate) fn unlink_missing_ok(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Rename, reporting whether the source existed.
pub(crate) fn rename_missing_ok(from: &Path, to: &Path) -> Result<bool> {
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(from, e)),
    }
}

/// Modification time in whole seconds, or `None` if the file is missing.
pub(crate) fn mtime(path: &Path) -> Result<Option<i64>> {
    match fs::metadata(path) {
        Ok(metadata) => {
            let modified = metadata.modified().map_err(|e| StoreError::io(path, e))?;
            Ok(Some(to_timestamp(modified)))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

pub(crate) fn set_mtime(path: &Path, timestamp: i64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    file.set_modified(from_timestamp(timestamp))
        .map_err(|e| StoreError::io(path, e))
}

/// Create the file if needed and bump its modification time.
pub(crate) fn touch(path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    file.set_modified(SystemTime::now())
        .map_err(|e| StoreError::io(path, e))
}

pub(crate) fn to_timestamp(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

fn from_timestamp(timestamp: i64) -> SystemTime {
    if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(timestamp.unsigned_abs())
    }
}

/// Exclusive advisory lock on a file, released on drop.
///
/// Locking creates the file if it does not exist yet.
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        file.lock_exclusive().map_err(|e| StoreError::io(path, e))?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
