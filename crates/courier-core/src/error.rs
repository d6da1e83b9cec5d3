use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by a [`Store`](crate::store::Store) or an
/// [`ItemHandle`](crate::store::ItemHandle).
///
/// Filesystem errors are logged where they happen and folded into one of
/// these coarse kinds, so callers never match on raw OS errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("couldn't lock the file for storing the data")]
    StoreLockFailed,

    #[error("trying to store duplicated data")]
    DuplicateStore,

    #[error("couldn't save the data")]
    StoreFailed,

    #[error("couldn't lock the file for reading the data")]
    GetLockFailed,

    #[error("couldn't read any local data")]
    GetFailed,

    #[error("couldn't find any local data for reading")]
    GetEmpty,

    #[error("couldn't remove the local data")]
    RemoveFailed,

    #[error("wait timed out")]
    TimedOut,

    #[error("the local storage was closed")]
    StoreClosed,
}

/// Fatal errors while opening a store.
///
/// A store that can't establish its lock directory or count what is already
/// on disk has no safe degraded mode, so the caller decides whether to abort.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("failed to create the storage dir {path}")]
    CreateStoreDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to clean the lock dir {path}")]
    CleanLockDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create the lock dir {path}")]
    CreateLockDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to scan the storage dir {path}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start the wake timer")]
    SpawnTimer(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_error_keeps_io_source() {
        use std::error::Error as _;

        let err = OpenError::Scan {
            path: PathBuf::from("/nope"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/nope"));
        assert_eq!(err.source().unwrap().to_string(), "gone");
    }
}
