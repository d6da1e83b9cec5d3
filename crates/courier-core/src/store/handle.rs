//! Item handle for the file system store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::ItemHandle;
use super::lock::ItemLock;
use super::notifier::Notifier;
use crate::error::StoreError;

/// Handle to one claimed payload file.
///
/// Holds the item's lock for as long as it lives.
#[derive(Debug)]
pub struct FsItemHandle {
    data: Vec<u8>,
    path: PathBuf,
    lock: ItemLock,
    notifier: Arc<Notifier>,
}

impl FsItemHandle {
    pub(crate) fn new(data: Vec<u8>, path: PathBuf, lock: ItemLock, notifier: Arc<Notifier>) -> Self {
        Self {
            data,
            path,
            lock,
            notifier,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ItemHandle for FsItemHandle {
    fn bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn remove(self: Box<Self>) -> Result<(), StoreError> {
        let Self {
            path,
            lock,
            notifier,
            ..
        } = *self;

        if let Err(e) = fs::remove_file(&path) {
            error!(path = %path.display(), error = %e, "couldn't remove the data file");
            // lock drops here: released, not deleted
            return Err(StoreError::RemoveFailed);
        }

        let lock_path = lock.path().to_path_buf();
        if let Err(e) = lock.remove() {
            // stale marker only; the payload is already gone
            warn!(path = %lock_path.display(), error = %e, "couldn't remove the lock file");
        }

        notifier.removed();
        debug!(path = %path.display(), "removed item");
        Ok(())
    }

    fn close(self: Box<Self>) {
        debug!(path = %self.path.display(), "released item");
    }
}
