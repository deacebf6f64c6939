use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::QueueError;
use crate::services::queue_backend::{QueueBackend, QueueConfig, QueueStats, ReceivedMessage};

/// How often a waiting `receive` re-checks for ready messages.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct StoredMessage {
    message_id: String,
    body: String,
    receipt_handle: Option<String>,
    receive_count: u32,
    visible_at: Instant,
    sent_at: Instant,
}

struct MemoryQueue {
    config: QueueConfig,
    created_at: DateTime<Utc>,
    messages: Vec<StoredMessage>,
}

impl MemoryQueue {
    fn discard_expired(&mut self, now: Instant) {
        let retention = Duration::from_secs(self.config.retention_period_seconds);
        self.messages
            .retain(|m| now.saturating_duration_since(m.sent_at) < retention);
    }
}

/// Process-local queue backend.
///
/// Timing uses `tokio::time::Instant`, so paused-clock tests can step through
/// delays and visibility timeouts with `tokio::time::advance`.
#[derive(Default)]
pub struct InMemoryBackend {
    queues: Mutex<HashMap<String, MemoryQueue>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive without waiting. Applies retention and the redrive policy first.
    async fn try_receive(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut queues = self.queues.lock().await;
        let now = Instant::now();

        let (redriven, target) = {
            let q = queues
                .get_mut(queue)
                .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;
            q.discard_expired(now);

            let max_receive_count = q.config.max_receive_count;
            let mut redriven = Vec::new();
            if let Some(target) = q.config.dead_letter_target.clone() {
                let mut i = 0;
                while i < q.messages.len() {
                    let m = &q.messages[i];
                    if m.visible_at <= now && m.receive_count >= max_receive_count {
                        redriven.push(q.messages.remove(i));
                    } else {
                        i += 1;
                    }
                }
                (redriven, Some(target))
            } else {
                (redriven, None)
            }
        };

        if let Some(target) = target {
            if !redriven.is_empty() {
                match queues.get_mut(&target) {
                    Some(dlq) => {
                        tracing::warn!(
                            "Redriving {} message(s) from {} to {}",
                            redriven.len(),
                            queue,
                            target
                        );
                        for mut m in redriven {
                            m.receipt_handle = None;
                            m.receive_count = 0;
                            dlq.messages.push(m);
                        }
                    }
                    None => {
                        tracing::warn!(
                            "Dead-letter target {} of {} does not exist; dropping {} message(s)",
                            target,
                            queue,
                            redriven.len()
                        );
                    }
                }
            }
        }

        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;
        let visibility = Duration::from_secs(q.config.visibility_timeout_seconds);

        let mut ready: Vec<&mut StoredMessage> =
            q.messages.iter_mut().filter(|m| m.visible_at <= now).collect();
        ready.sort_by_key(|m| (m.visible_at, m.sent_at));

        let received = ready
            .into_iter()
            .take(max_messages)
            .map(|m| {
                let handle = Uuid::new_v4().to_string();
                m.receipt_handle = Some(handle.clone());
                m.receive_count += 1;
                m.visible_at = now + visibility;
                ReceivedMessage {
                    message_id: m.message_id.clone(),
                    receipt_handle: handle,
                    body: m.body.clone(),
                    receive_count: m.receive_count,
                }
            })
            .collect();

        Ok(received)
    }
}

#[async_trait]
impl QueueBackend for InMemoryBackend {
    async fn create(&self, name: &str, config: &QueueConfig) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        queues.entry(name.to_string()).or_insert_with(|| {
            tracing::info!("Created in-memory queue {}", name);
            MemoryQueue {
                config: config.clone(),
                created_at: Utc::now(),
                messages: Vec::new(),
            }
        });
        Ok(())
    }

    async fn send(&self, queue: &str, body: &str, delay_seconds: u64) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let now = Instant::now();
        q.messages.push(StoredMessage {
            message_id: Uuid::new_v4().to_string(),
            body: body.to_string(),
            receipt_handle: None,
            receive_count: 0,
            visible_at: now + Duration::from_secs(delay_seconds),
            sent_at: now,
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait_seconds: u64,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + Duration::from_secs(wait_seconds);
        loop {
            let received = self.try_receive(queue, max_messages).await?;
            let now = Instant::now();
            if !received.is_empty() || now >= deadline {
                return Ok(received);
            }
            tokio::time::sleep(RECEIVE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let before = q.messages.len();
        q.messages
            .retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
        if q.messages.len() == before {
            tracing::debug!(
                "Delete on {} ignored: receipt handle {} is unknown or stale",
                queue,
                receipt_handle
            );
        }
        Ok(())
    }

    async fn purge(&self, queue: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;
        q.messages.clear();
        Ok(())
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        let mut queues = self.queues.lock().await;
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let now = Instant::now();
        q.discard_expired(now);

        let mut stats = QueueStats {
            visible_messages: 0,
            in_flight_messages: 0,
            delayed_messages: 0,
            created_timestamp: q.created_at,
        };
        for m in &q.messages {
            if m.visible_at <= now {
                stats.visible_messages += 1;
            } else if m.receipt_handle.is_some() {
                stats.in_flight_messages += 1;
            } else {
                stats.delayed_messages += 1;
            }
        }
        Ok(stats)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, QueueError> {
        let queues = self.queues.lock().await;
        let mut names: Vec<String> = queues
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }
}
