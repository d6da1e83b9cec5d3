//! Store module: durable local persistence, per-item locking and the wait protocol.
//!
//! Messages are first written to local disk and only then relayed, so a
//! remote outage never loses data. Usage:
//!
//! ```ignore
//! let store = FsStore::open(StoreConfig::new("/tmp/local-store", Duration::from_secs(60)))?;
//!
//! // consumer
//! while store.wait() != Err(StoreError::StoreClosed) {
//!     let Ok(item) = store.get() else { continue };
//!     let bytes = item.bytes();
//!     // deliver `bytes` ...
//!     item.remove()?;
//! }
//!
//! // producer
//! store.store(b"some-data")?;
//! store.close();
//! ```

mod fs;
mod handle;
mod lock;
mod name;
mod notifier;

pub use fs::{FsStore, StoreConfig};
pub use handle::FsItemHandle;
pub use name::{HASH_OFFSET, ItemName, TIME_FORMAT, content_hash};

use crate::error::StoreError;

/// One retrieved item.
/// The consumer owns this handle and must either `remove` or `close` it.
///
/// Design intent:
/// - While the handle is alive the item is claimed; no other `get` returns it.
/// - `remove` finalizes (delivered), `close` releases for redelivery.
/// - Dropping the handle without either behaves like `close`.
pub trait ItemHandle: Send {
    /// A copy of the payload. Mutating it never changes the stored item.
    fn bytes(&self) -> Vec<u8>;

    /// Delete the item for good.
    ///
    /// On failure the item is released as if `close` had been called, so it
    /// stays retrievable (and may be delivered again).
    fn remove(self: Box<Self>) -> Result<(), StoreError>;

    /// Release the item without deleting it.
    fn close(self: Box<Self>);
}

/// Store port (interface).
/// The file system store is the only implementation, but the relay loop and
/// the HTTP layer only depend on this seam.
pub trait Store: Send + Sync {
    /// Persist `data`.
    fn store(&self, data: &[u8]) -> Result<(), StoreError>;

    /// Claim one stored item. No ordering guarantee (not FIFO).
    fn get(&self) -> Result<Box<dyn ItemHandle>, StoreError>;

    /// Block until something is pending (`Ok`), the timer fires with nothing
    /// pending (`TimedOut`), or the store is closed (`StoreClosed`).
    fn wait(&self) -> Result<(), StoreError>;

    /// Close the store and wake every waiter.
    fn close(&self);

    /// Number of pending items.
    fn count(&self) -> usize;
}
