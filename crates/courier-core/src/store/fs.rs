//! File system store.
//!
//! # Layout
//! - `<dir>/<timestamp>-<hash>`: one payload per file, mode 0600
//! - `<dir>/.lock/<timestamp>-<hash>`: lock markers, wiped on every open
//! - `<dir>/.<name>.tmp`: in-progress writes, never retrieved
//!
//! Hidden entries and subdirectories are ignored by every scan.

use std::fs::{self, DirEntry, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::handle::FsItemHandle;
use super::lock::ItemLock;
use super::name::ItemName;
use super::notifier::Notifier;
use super::{ItemHandle, Store};
use crate::error::{OpenError, StoreError};
use crate::ports::{Clock, SystemClock};

const LOCK_DIR: &str = ".lock";

/// Where the store lives and how often an idle consumer is woken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub dir: PathBuf,

    /// Forced-wake period. `Duration::ZERO` disables the timer.
    pub wait_timeout: Duration,
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>, wait_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            wait_timeout,
        }
    }
}

/// Durable store backed by one directory.
///
/// # 設計原則
/// - ファイル名 = 書き込み時刻 + 内容ハッシュ（重複検出と整合性検証を兼ねる）
/// - 排他は per-item の advisory lock のみ（try once, never block）
/// - pending count は起動時にディレクトリから再構築
pub struct FsStore {
    dir: PathBuf,
    lock_dir: PathBuf,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl FsStore {
    /// Open (or create) a store, recovering whatever is already on disk.
    pub fn open(config: StoreConfig) -> Result<Self, OpenError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self, OpenError> {
        let dir = config.dir;
        let lock_dir = dir.join(LOCK_DIR);

        fs::create_dir_all(&dir).map_err(|source| OpenError::CreateStoreDir {
            path: dir.clone(),
            source,
        })?;

        // Locks from a previous run are stale: a crashed process holds nothing.
        match fs::remove_dir_all(&lock_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(OpenError::CleanLockDir {
                    path: lock_dir,
                    source,
                });
            }
        }
        fs::create_dir_all(&lock_dir).map_err(|source| OpenError::CreateLockDir {
            path: lock_dir.clone(),
            source,
        })?;

        let pending = count_items(&dir).map_err(|source| OpenError::Scan {
            path: dir.clone(),
            source,
        })?;

        let notifier = Arc::new(Notifier::new(pending));
        let timer = if config.wait_timeout.is_zero() {
            None
        } else {
            Some(
                notifier
                    .spawn_timer(config.wait_timeout)
                    .map_err(OpenError::SpawnTimer)?,
            )
        };

        info!(
            dir = %dir.display(),
            pending,
            wait_timeout_ms = config.wait_timeout.as_millis() as u64,
            "opened local store"
        );

        Ok(Self {
            dir,
            lock_dir,
            notifier,
            clock,
            timer: Mutex::new(timer),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.lock_dir.join(name)
    }

    /// Try to claim one directory entry.
    ///
    /// `Ok(None)` means "skip it and keep scanning".
    fn claim(&self, entry: &DirEntry) -> Result<Option<FsItemHandle>, StoreError> {
        let Some(file_name) = item_file_name(entry) else {
            return Ok(None);
        };

        let lock = match ItemLock::try_acquire(self.lock_path(&file_name)) {
            Ok(Some(lock)) => lock,
            // someone else owns it
            Ok(None) => return Ok(None),
            Err(e) => {
                error!(file = %file_name, error = %e, "get: lock attempt failed");
                return Err(StoreError::GetLockFailed);
            }
        };

        // From here on every early return drops `lock`, which releases it.
        let path = entry.path();
        let Some(name) = ItemName::parse(&file_name) else {
            warn!(path = %path.display(), "get: invalid file name");
            return Ok(None);
        };

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // removed between the directory read and the lock
                return Ok(None);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "get: couldn't read file");
                return Ok(None);
            }
        };

        if !name.verify(&data) {
            warn!(path = %path.display(), "get: corrupted file");
            return Ok(None);
        }

        debug!(path = %path.display(), "claimed item");
        Ok(Some(FsItemHandle::new(
            data,
            path,
            lock,
            Arc::clone(&self.notifier),
        )))
    }
}

impl Store for FsStore {
    fn store(&self, data: &[u8]) -> Result<(), StoreError> {
        let name = ItemName::new(self.clock.now(), data);

        // Two identical requests in the same second race for the same name;
        // only the lock holder writes.
        let lock = match ItemLock::try_acquire(self.lock_path(name.as_str())) {
            Ok(Some(lock)) => lock,
            Ok(None) => return Err(StoreError::DuplicateStore),
            Err(e) => {
                error!(name = %name, error = %e, "store: lock attempt failed");
                return Err(StoreError::StoreLockFailed);
            }
        };

        // Same name already written (and its lock since released).
        let path = self.dir.join(name.as_str());
        match fs::symlink_metadata(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            _ => return Err(StoreError::DuplicateStore),
        }

        if let Err(e) = write_atomically(&self.dir, &name, data) {
            error!(path = %path.display(), error = %e, "store: write failed");
            return Err(StoreError::StoreFailed);
        }

        // Count before unlocking, so a concurrent get+remove can't decrement first.
        self.notifier.added();
        drop(lock);

        debug!(path = %path.display(), bytes = data.len(), "stored item");
        Ok(())
    }

    fn get(&self) -> Result<Box<dyn ItemHandle>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            error!(dir = %self.dir.display(), error = %e, "get: couldn't read the storage dir");
            StoreError::GetFailed
        })?;

        // First valid, unclaimed entry in directory order wins.
        for entry in entries {
            let entry = entry.map_err(|e| {
                error!(dir = %self.dir.display(), error = %e, "get: couldn't walk the storage dir");
                StoreError::GetFailed
            })?;

            if let Some(handle) = self.claim(&entry)? {
                return Ok(Box::new(handle));
            }
        }

        Err(StoreError::GetEmpty)
    }

    fn wait(&self) -> Result<(), StoreError> {
        self.notifier.wait()
    }

    fn close(&self) {
        let was_running = self.notifier.is_running();
        self.notifier.close();

        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            let _ = timer.join();
        }
        if was_running {
            info!(dir = %self.dir.display(), "closed local store");
        }
    }

    fn count(&self) -> usize {
        self.notifier.count()
    }
}

impl Drop for FsStore {
    fn drop(&mut self) {
        // stops the timer thread; nothing on disk is touched
        self.close();
    }
}

/// Name of a directory entry that may hold an item, or `None` for
/// hidden entries, directories and non UTF-8 names.
fn item_file_name(entry: &DirEntry) -> Option<String> {
    let file_name = entry.file_name();
    let Some(file_name) = file_name.to_str() else {
        warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
        return None;
    };
    if file_name.starts_with('.') {
        return None;
    }
    match entry.file_type() {
        Ok(t) if t.is_dir() => None,
        Ok(_) => Some(file_name.to_string()),
        Err(e) => {
            warn!(path = %entry.path().display(), error = %e, "couldn't stat entry");
            None
        }
    }
}

fn count_items(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if item_file_name(&entry).is_some() {
            count += 1;
        }
    }
    Ok(count)
}

/// Write to a hidden temp file, fsync, rename into place, fsync the dir.
fn write_atomically(dir: &Path, name: &ItemName, data: &[u8]) -> io::Result<()> {
    write_atomically_with(dir, name, data, fsync_dir)
}

/// Once the rename succeeded the item exists and will be delivered; a
/// failed directory sync after that point is only logged.
fn write_atomically_with(
    dir: &Path,
    name: &ItemName,
    data: &[u8],
    sync_dir: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<()> {
    let temp_path = dir.join(format!(".{name}.tmp"));

    let result = write_owner_only(&temp_path, data)
        .and_then(|()| fs::rename(&temp_path, dir.join(name.as_str())));
    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = sync_dir(dir) {
        warn!(dir = %dir.display(), error = %e, "couldn't sync the storage dir");
    }
    Ok(())
}

fn write_owner_only(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn fsync_dir(dir: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir)?.sync_all()
}
