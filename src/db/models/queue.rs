use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A named queue as stored in the `queues` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueRecord {
    pub name: String,

    /// Seconds a received message stays hidden from other receivers.
    pub visibility_timeout_seconds: i64,

    /// Seconds a message is kept before being discarded.
    pub retention_period_seconds: i64,

    /// Queue that receives messages exceeding `max_receive_count`.
    pub dead_letter_target: Option<String>,

    pub max_receive_count: i64,

    pub created_at: NaiveDateTime,
}

/// A message row in `queue_messages`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Backend message id (distinct from the envelope id inside `body`).
    pub id: String,

    pub queue_name: String,

    /// Serialized envelope.
    pub body: String,

    /// Set on every receive; cleared when the message is redriven.
    pub receipt_handle: Option<String>,

    pub receive_count: i64,

    /// The message can be received once this time has passed.
    pub visible_at: NaiveDateTime,

    pub sent_at: NaiveDateTime,
}

/// Aggregated message counts for one queue.
#[derive(Debug, Clone, Default, FromRow)]
pub struct QueueCounts {
    pub visible: i64,
    pub in_flight: i64,
    pub delayed: i64,
}
