//! Per-item advisory locks.
//!
//! Uses `fs2` for cross-platform file locking (flock on Unix, LockFile on
//! Windows). flock is bound to the open file description, so two opens of
//! the same marker conflict even inside one process.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// An exclusive lock on one item, keyed by the item's file name.
///
/// Released on drop (RAII). The marker file itself stays behind unless
/// [`ItemLock::remove`] is called.
#[derive(Debug)]
pub struct ItemLock {
    /// Kept open to maintain the lock.
    file: File,
    path: PathBuf,
}

impl ItemLock {
    /// Try once to take the lock, never blocking.
    ///
    /// Returns `Ok(None)` when someone else holds it.
    pub fn try_acquire(path: PathBuf) -> io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and delete its marker file.
    pub fn remove(self) -> io::Result<()> {
        let _ = FileExt::unlock(&self.file);
        fs::remove_file(&self.path)
    }
}

impl Drop for ItemLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(err: &io::Error) -> bool {
    let contended = fs2::lock_contended_error();
    err.kind() == io::ErrorKind::WouldBlock
        || (err.raw_os_error().is_some() && err.raw_os_error() == contended.raw_os_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_is_refused_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("item");

        let first = ItemLock::try_acquire(path.clone()).unwrap();
        assert!(first.is_some());

        let second = ItemLock::try_acquire(path.clone()).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("item");

        {
            let _lock = ItemLock::try_acquire(path.clone()).unwrap().unwrap();
        }

        // marker stays, but the lock is free again
        assert!(path.exists());
        assert!(ItemLock::try_acquire(path).unwrap().is_some());
    }

    #[test]
    fn remove_deletes_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("item");

        let lock = ItemLock::try_acquire(path.clone()).unwrap().unwrap();
        assert_eq!(lock.path(), path.as_path());
        lock.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn missing_lock_dir_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("item");
        assert!(ItemLock::try_acquire(path).is_err());
    }
}
