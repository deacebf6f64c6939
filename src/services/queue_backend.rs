//! Narrow queue abstraction the notification pipeline is written against.
//!
//! Backends provide at-least-once delivery with visibility-timeout semantics:
//! a received message stays hidden for `visibility_timeout` seconds and
//! reappears unless it is deleted with its receipt handle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::QueueError;

/// Settings applied when a queue is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub visibility_timeout_seconds: u64,
    pub retention_period_seconds: u64,
    /// Queue receiving messages that were received `max_receive_count` times
    /// without being deleted.
    pub dead_letter_target: Option<String>,
    pub max_receive_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: 30,
            retention_period_seconds: 1_209_600,
            dead_letter_target: None,
            max_receive_count: 5,
        }
    }
}

/// A message handed out by `receive`.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Opaque handle for `delete`; only valid for this receipt.
    pub receipt_handle: String,
    /// Raw serialized envelope.
    pub body: String,
    pub receive_count: u32,
}

/// Point-in-time counts, not consistent with concurrent mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub visible_messages: u64,
    pub in_flight_messages: u64,
    pub delayed_messages: u64,
    pub created_timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    /// Create `name` unless it already exists.
    async fn create(&self, name: &str, config: &QueueConfig) -> Result<(), QueueError>;

    /// Enqueue a serialized envelope, receivable after `delay_seconds`.
    async fn send(&self, queue: &str, body: &str, delay_seconds: u64) -> Result<(), QueueError>;

    /// Receive up to `max_messages`, waiting at most `wait_seconds` for the first one.
    /// An empty vector means nothing was ready.
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait_seconds: u64,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Remove a received message. Unknown or stale handles are not an error.
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError>;

    async fn purge(&self, queue: &str) -> Result<(), QueueError>;

    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError>;

    /// Names of existing queues starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, QueueError>;
}
