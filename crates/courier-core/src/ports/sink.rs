//! Sink port - 配送先（リモートキュー）
//!
//! The relay loop hands every retrieved message to a `Sink`. The sink owns
//! its own configuration and credentials; the core only calls `send`.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The message can never be accepted as-is.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Delivery failed; the same message may succeed later.
    #[error("failed to send the message: {0}")]
    SendFailed(String),
}

/// Sink delivers one message to the remote side.
///
/// # Design
/// - Stateless from the core's point of view.
/// - Must tolerate duplicates: the relay loop is at-least-once.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), SinkError>;
}
