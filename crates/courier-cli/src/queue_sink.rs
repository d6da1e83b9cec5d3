//! QueueSink - リモートキューへの配送
//!
//! Speaks the query-style `SendMessage` action over plain HTTP. Request
//! signing is left to the deployment (a signing proxy, or a simulator that
//! accepts unsigned requests).

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use courier_core::ports::{Sink, SinkError};

/// Largest message body the queue accepts.
pub const MAX_MESSAGE_BYTES: usize = 262_144;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Custom endpoint (e.g. localstack). `None` sends straight to `queue`.
    pub endpoint: Option<String>,
    /// Full destination queue URL.
    pub queue: String,
}

impl SinkConfig {
    /// Where requests actually go.
    ///
    /// With a custom endpoint, the endpoint's scheme/host/port are combined
    /// with the queue URL's path.
    pub fn target(&self) -> anyhow::Result<Url> {
        let queue = Url::parse(&self.queue)
            .with_context(|| format!("invalid queue URL {:?}", self.queue))?;

        let Some(endpoint) = &self.endpoint else {
            return Ok(queue);
        };

        let mut target = Url::parse(endpoint)
            .with_context(|| format!("invalid endpoint URL {endpoint:?}"))?;
        target.set_path(queue.path());
        target.set_query(None);
        target.set_fragment(None);
        Ok(target)
    }
}

pub struct QueueSink {
    client: reqwest::Client,
    target: Url,
    queue: String,
}

impl QueueSink {
    pub fn new(config: SinkConfig) -> anyhow::Result<Self> {
        let target = config.target()?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build the HTTP client")?;

        Ok(Self {
            client,
            target,
            queue: config.queue,
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }
}

#[async_trait]
impl Sink for QueueSink {
    async fn send(&self, message: &str) -> Result<(), SinkError> {
        validate(message)?;

        let response = self
            .client
            .post(self.target.clone())
            .form(&[
                ("Action", "SendMessage"),
                ("MessageBody", message),
                ("QueueUrl", self.queue.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!(target_url = %self.target, error = %e, "couldn't reach the queue");
                SinkError::SendFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, message = %message, "the queue rejected the message");
            return Err(SinkError::SendFailed(format!("queue answered {status}")));
        }

        debug!(%status, "message sent");
        Ok(())
    }
}

/// Checks done before any request is made.
pub fn validate(message: &str) -> Result<(), SinkError> {
    if message.is_empty() {
        return Err(SinkError::InvalidInput("empty message".into()));
    }
    if message.len() > MAX_MESSAGE_BYTES {
        return Err(SinkError::InvalidInput(format!(
            "message is {} bytes, the limit is {MAX_MESSAGE_BYTES}",
            message.len()
        )));
    }
    if let Some(c) = message.chars().find(|c| !allowed_char(*c)) {
        return Err(SinkError::InvalidInput(format!(
            "character U+{:04X} is not allowed",
            c as u32
        )));
    }
    Ok(())
}

// #x9 | #xA | #xD | #x20 to #xD7FF | #xE000 to #xFFFD | #x10000 to #x10FFFF
fn allowed_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}
