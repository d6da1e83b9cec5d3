//! MemorySink - 開発用の sink
//!
//! Records every delivered message. It can be told to fail the first N
//! sends, which is how the relay's redelivery path is exercised.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::ports::{Sink, SinkError};

#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<String>>,
    remaining_failures: AtomicU32,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` sends with `SendFailed`.
    pub fn failing_first(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
            ..Self::default()
        }
    }

    /// Messages accepted so far, in delivery order.
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of `send` calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn send(&self, message: &str) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(SinkError::SendFailed(format!(
                "intentional failure (left={left})"
            )));
        }

        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_messages_in_order() {
        let sink = MemorySink::new();
        sink.send("a").await.unwrap();
        sink.send("b").await.unwrap();

        assert_eq!(sink.sent(), vec!["a", "b"]);
        assert_eq!(sink.attempts(), 2);
    }

    #[tokio::test]
    async fn failing_first_rejects_then_accepts() {
        let sink = MemorySink::failing_first(2);

        assert!(matches!(sink.send("x").await, Err(SinkError::SendFailed(_))));
        assert!(matches!(sink.send("x").await, Err(SinkError::SendFailed(_))));
        assert_eq!(sink.send("x").await, Ok(()));

        assert_eq!(sink.sent(), vec!["x"]);
        assert_eq!(sink.attempts(), 3);
    }
}
