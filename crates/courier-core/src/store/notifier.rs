//! Notifier - store と consumer の間の同期
//!
//! # 学習ポイント
//! - Mutex + Condvar による blocking wait
//! - timer スレッドによる forced wake（pending が 0 のときだけ）
//!
//! Store writes bump `pending` and wake one waiter. The timer thread wakes
//! the consumer every period while nothing is pending so it can re-check
//! liveness; it never signals "data available".

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::StoreError;

#[derive(Debug)]
struct NotifierState {
    /// Known unclaimed-or-in-flight items on disk.
    pending: usize,

    /// False once the store was closed.
    running: bool,

    /// One-shot flag set by the timer.
    force_wake: bool,
}

/// Shared synchronization state between a store, its handles and its timer.
#[derive(Debug)]
pub(crate) struct Notifier {
    state: Mutex<NotifierState>,
    /// Waiters in `wait()`.
    wake: Condvar,
    /// The timer thread, so `close()` can stop it mid-period.
    timer: Condvar,
}

impl Notifier {
    pub(crate) fn new(pending: usize) -> Self {
        Self {
            state: Mutex::new(NotifierState {
                pending,
                running: true,
                force_wake: false,
            }),
            wake: Condvar::new(),
            timer: Condvar::new(),
        }
    }

    // The state is three plain fields that are never left half-updated, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// An item was persisted.
    pub(crate) fn added(&self) {
        let mut state = self.lock();
        state.pending += 1;
        drop(state);
        self.wake.notify_one();
    }

    /// An item was finalized.
    pub(crate) fn removed(&self) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
    }

    pub(crate) fn count(&self) -> usize {
        self.lock().pending
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Block until something is pending, the store closes, or the timer fires.
    pub(crate) fn wait(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        while state.pending == 0 && state.running && !state.force_wake {
            state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        // closed wins over everything, then data over a stale forced wake
        if !state.running {
            return Err(StoreError::StoreClosed);
        }
        let timed_out = state.pending == 0;
        state.force_wake = false;
        if timed_out {
            Err(StoreError::TimedOut)
        } else {
            Ok(())
        }
    }

    /// Stop running: every current and future `wait()` returns `StoreClosed`.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.running = false;
        drop(state);
        self.wake.notify_all();
        self.timer.notify_all();
    }

    /// Spawn the forced-wake timer. It exits once the notifier is closed.
    pub(crate) fn spawn_timer(self: &Arc<Self>, period: Duration) -> io::Result<JoinHandle<()>> {
        let notifier = Arc::clone(self);
        thread::Builder::new()
            .name("courier-wake-timer".to_string())
            .spawn(move || notifier.run_timer(period))
    }

    fn run_timer(&self, period: Duration) {
        let mut state = self.lock();
        loop {
            // 次の周期まで待つ（close されたら即終了）
            let deadline = Instant::now() + period;
            loop {
                if !state.running {
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                state = match self.timer.wait_timeout(state, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }

            if state.pending == 0 {
                state.force_wake = true;
                self.wake.notify_one();
            }
        }
    }
}
