//! RelayLoop - store から sink への配送ループ
//!
//! # フロー
//! 1. Store::wait() で pending を待つ（TimedOut ならもう一周）
//! 2. Store::get() で 1 件 claim
//! 3. Sink::send() で配送
//! 4. 成功なら remove、失敗なら close（再配送）
//!
//! # 学習ポイント
//! - blocking な store 呼び出しは spawn_blocking に逃がす
//! - watch channel による shutdown 通知
//! - 失敗が続いたときだけ backoff する

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::retry::RetryPolicy;
use crate::error::StoreError;
use crate::ports::Sink;
use crate::store::Store;

/// Outcome of one relay iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The store is closed; the loop must end.
    Closed,
    /// One message reached the sink and was removed.
    Delivered,
    /// Nothing to do right now.
    Idle,
    /// Something went wrong; the message (if any) is still stored.
    Failed,
}

/// Moves messages from a [`Store`] to a [`Sink`], at least once.
pub struct RelayLoop {
    store: Arc<dyn Store>,
    sink: Arc<dyn Sink>,
    retry: RetryPolicy,
}

impl RelayLoop {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn Sink>) -> Self {
        Self {
            store,
            sink,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run the loop as a tokio task.
    pub fn spawn(self) -> RelayHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(&self.store);

        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        RelayHandle {
            store,
            shutdown_tx,
            join,
        }
    }

    /// Drive the pipeline until the store is closed or shutdown is requested.
    pub async fn run(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        info!("relay loop started");
        let mut failures: u32 = 0;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.step().await {
                Step::Closed => break,
                Step::Delivered => failures = 0,
                Step::Idle => {}
                Step::Failed => failures = failures.saturating_add(1),
            }

            let delay = self.retry.next_delay(failures);
            if delay.is_zero() {
                continue;
            }

            debug!(failures, delay_ms = delay.as_millis() as u64, "backing off");
            // shutdown が来たら sleep を打ち切る
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {}
            }
        }

        info!("relay loop stopped");
    }

    /// One wait → get → send → remove/close iteration.
    pub async fn step(&self) -> Step {
        let store = Arc::clone(&self.store);
        match blocking(move || store.wait()).await {
            Some(Ok(())) => {}
            Some(Err(StoreError::StoreClosed)) => return Step::Closed,
            Some(Err(StoreError::TimedOut)) => return Step::Idle,
            Some(Err(e)) => {
                warn!(error = %e, "wait failed");
                return Step::Failed;
            }
            None => return Step::Failed,
        }

        let store = Arc::clone(&self.store);
        let item = match blocking(move || store.get().map_err(|e| (e, store.count()))).await {
            Some(Ok(item)) => item,
            // another consumer got there first
            Some(Err((StoreError::GetEmpty, 0))) => return Step::Idle,
            Some(Err((StoreError::GetEmpty, pending))) => {
                // pending だが取れない: 他の consumer が保持中か、壊れたファイル
                debug!(pending, "nothing retrievable");
                return Step::Failed;
            }
            Some(Err((e, _))) => {
                warn!(error = %e, "get failed");
                return Step::Failed;
            }
            None => return Step::Failed,
        };

        let message = match String::from_utf8(item.bytes()) {
            Ok(message) => message,
            Err(e) => {
                // the sink only takes text; keep the bytes untouched on disk
                warn!(error = %e, "message is not valid UTF-8, keeping it stored");
                blocking(move || item.close()).await;
                return Step::Failed;
            }
        };

        match self.sink.send(&message).await {
            Ok(()) => match blocking(move || item.remove()).await {
                Some(Ok(())) => {
                    debug!(bytes = message.len(), "delivered message");
                    Step::Delivered
                }
                Some(Err(e)) => {
                    // the lock is already released; the item may be delivered again
                    error!(error = %e, "delivered but couldn't remove the message");
                    Step::Failed
                }
                None => Step::Failed,
            },
            Err(e) => {
                warn!(error = %e, "failed to send the message");
                blocking(move || item.close()).await;
                Step::Failed
            }
        }
    }
}

/// Relay task handle.
/// - `shutdown_and_join()` で store を close してループの終了を待つ
/// - `join()` は store が外から close されるのを待つだけ
pub struct RelayHandle {
    store: Arc<dyn Store>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RelayHandle {
    /// Ask the loop to stop after the current iteration.
    ///
    /// A loop blocked in `wait` only notices once the store is closed or the
    /// wake timer fires.
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Close the store, stop the loop and wait for it.
    pub async fn shutdown_and_join(self) {
        let store = Arc::clone(&self.store);
        blocking(move || store.close()).await;
        self.request_shutdown();
        self.join().await;
    }

    /// Wait for the loop to end.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(error = %e, "relay task failed");
        }
    }
}

/// Run a blocking store call off the async workers.
///
/// `None` means the blocking task panicked or was cancelled; that is logged here.
async fn blocking<T, F>(f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(error = %e, "blocking store call failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemorySink;
    use crate::ports::FixedClock;
    use crate::store::{FsStore, StoreConfig};
    use chrono::{Local, TimeZone};
    use std::time::Duration;
    use tempfile::TempDir;

    fn open(dir: &TempDir, timeout: Duration) -> Arc<FsStore> {
        let at = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let store = FsStore::open_with_clock(
            StoreConfig::new(dir.path(), timeout),
            Arc::new(FixedClock::new(at)),
        )
        .unwrap();
        Arc::new(store)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn delivers_every_stored_message() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Duration::from_millis(10));
        let sink = Arc::new(MemorySink::new());

        for msg in ["one", "two", "three"] {
            store.store(msg.as_bytes()).unwrap();
        }

        let handle = RelayLoop::new(store.clone(), sink.clone())
            .with_retry_policy(RetryPolicy::none())
            .spawn();

        eventually(|| sink.sent().len() == 3).await;
        eventually(|| store.count() == 0).await;
        handle.shutdown_and_join().await;

        let mut sent = sink.sent();
        sent.sort();
        assert_eq!(sent, vec!["one", "three", "two"]);
    }

    #[tokio::test]
    async fn picks_up_messages_stored_while_running() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Duration::ZERO);
        let sink = Arc::new(MemorySink::new());

        let handle = RelayLoop::new(store.clone(), sink.clone()).spawn();
        store.store(b"late").unwrap();

        eventually(|| sink.sent() == vec!["late".to_string()]).await;
        handle.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_until_it_succeeds() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Duration::from_millis(10));
        let sink = Arc::new(MemorySink::failing_first(2));
        store.store(b"persistent").unwrap();

        let handle = RelayLoop::new(store.clone(), sink.clone())
            .with_retry_policy(RetryPolicy::none())
            .spawn();

        eventually(|| sink.sent().len() == 1).await;
        eventually(|| store.count() == 0).await;
        handle.shutdown_and_join().await;

        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.sent(), vec!["persistent".to_string()]);
    }

    #[tokio::test]
    async fn failed_delivery_keeps_the_message() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Duration::ZERO);
        let sink = Arc::new(MemorySink::failing_first(1));
        store.store(b"keep me").unwrap();

        let relay = RelayLoop::new(store.clone(), sink.clone());
        assert_eq!(relay.step().await, Step::Failed);
        assert_eq!(store.count(), 1);

        // released, so the next pass sees it again
        assert_eq!(relay.step().await, Step::Delivered);
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn non_utf8_payload_is_never_rewritten_or_removed() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Duration::ZERO);
        let raw = [0xff, b'o', b'k'];
        store.store(&raw).unwrap();

        let sink = Arc::new(MemorySink::new());
        let relay = RelayLoop::new(store.clone(), sink.clone());

        assert_eq!(relay.step().await, Step::Failed);
        assert_eq!(sink.attempts(), 0);
        assert_eq!(store.count(), 1);

        // released, and the bytes on disk are the original ones
        let item = store.get().unwrap();
        assert_eq!(item.bytes(), raw);
    }

    /// Accepts every message, but leaves a directory where the payload was,
    /// so the following remove can't succeed.
    struct PayloadSwappingSink {
        path: std::path::PathBuf,
    }

    #[async_trait::async_trait]
    impl Sink for PayloadSwappingSink {
        async fn send(&self, _message: &str) -> Result<(), crate::ports::SinkError> {
            std::fs::remove_file(&self.path).unwrap();
            std::fs::create_dir(&self.path).unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_remove_after_delivery_keeps_the_item_counted() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Duration::ZERO);
        store.store(b"delivered once").unwrap();

        let at = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let name = crate::store::ItemName::new(at, b"delivered once");
        let sink = Arc::new(PayloadSwappingSink {
            path: dir.path().join(name.as_str()),
        });
        let relay = RelayLoop::new(store.clone(), sink);

        assert_eq!(relay.step().await, Step::Failed);
        assert_eq!(store.count(), 1);

        // the claim was released
        let marker = std::fs::File::open(dir.path().join(".lock").join(name.as_str())).unwrap();
        assert!(fs2::FileExt::try_lock_exclusive(&marker).is_ok());
    }

    #[tokio::test]
    async fn step_is_idle_when_the_timer_fires() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Duration::from_millis(1));
        let relay = RelayLoop::new(store, Arc::new(MemorySink::new()));

        assert_eq!(relay.step().await, Step::Idle);
    }

    #[tokio::test]
    async fn step_reports_closed_store() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Duration::ZERO);
        store.close();
        let relay = RelayLoop::new(store, Arc::new(MemorySink::new()));

        assert_eq!(relay.step().await, Step::Closed);
    }

    #[tokio::test]
    async fn corrupted_pending_file_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("2024-01-01-12-00-00-deadbeef"), b"junk").unwrap();
        let store = open(&dir, Duration::ZERO);
        assert_eq!(store.count(), 1);

        let sink = Arc::new(MemorySink::new());
        let relay = RelayLoop::new(store, sink.clone());

        assert_eq!(relay.step().await, Step::Failed);
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn loop_ends_when_the_store_is_closed_elsewhere() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir, Duration::ZERO);
        let handle = RelayLoop::new(store.clone(), Arc::new(MemorySink::new())).spawn();

        store.close();

        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("relay loop did not stop");
    }

    #[tokio::test]
    async fn shutdown_cuts_the_backoff_short() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("2024-01-01-12-00-00-deadbeef"), b"junk").unwrap();
        let store = open(&dir, Duration::ZERO);

        let slow = RetryPolicy {
            base_delay: Duration::from_secs(60),
            multiplier: 1.0,
            max_delay: Duration::from_secs(60),
        };
        let handle = RelayLoop::new(store, Arc::new(MemorySink::new()))
            .with_retry_policy(slow)
            .spawn();

        // let the loop hit the corrupted file and start sleeping
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown_and_join())
            .await
            .expect("shutdown waited for the backoff");
    }
}
