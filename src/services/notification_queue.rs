use std::sync::Arc;

use serde::Serialize;

use crate::config::QueueSettings;
use crate::db::models::{NotificationPayload, Priority, QueueMessage};
use crate::error::QueueError;
use crate::services::delivery::DeliverySink;
use crate::services::queue_backend::{QueueBackend, QueueConfig, QueueStats, ReceivedMessage};

/// Largest batch a single receive may request.
pub const MAX_BATCH_SIZE: usize = 10;

/// Longest delay a producer may ask for.
pub const MAX_DELAY_SECONDS: u64 = 900;

/// Prefix shared by the queues reported by `list_queues`.
pub const QUEUE_LIST_PREFIX: &str = "notification";

/// `error_message` stamped on envelopes moved back from the dead-letter queue.
pub const REQUEUE_MARKER: &str = "Requeued from DLQ";

/// Outcome counters of one `process_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub processed: u32,
    pub successful: u32,
    pub failed: u32,
    pub retried: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequeueResult {
    pub requeued: u32,
    /// Messages still held by the dead-letter queue after the operation.
    pub available_in_dlq: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueDetails {
    pub name: String,
    #[serde(flatten)]
    pub stats: QueueStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub status: SubsystemStatus,
    pub pending: u64,
    pub failed: u64,
    pub queues: Vec<QueueDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub main_queue_reachable: bool,
    pub dead_letter_queue_reachable: bool,
}

enum MessageOutcome {
    Delivered,
    Retried,
    Failed(QueueError),
}

/// Exponential backoff: `base * 2^(retry_count - 1)`, capped at `cap`.
pub fn backoff_delay(base_seconds: u64, cap_seconds: u64, retry_count: u32) -> u64 {
    let mut delay = base_seconds;
    for _ in 1..retry_count {
        delay = delay.saturating_mul(2);
        if delay >= cap_seconds {
            break;
        }
    }
    delay.min(cap_seconds)
}

/// Enqueues notifications and drains the main queue with retry, backoff and
/// dead-letter handling.
pub struct NotificationQueueService {
    backend: Arc<dyn QueueBackend>,
    sink: Arc<dyn DeliverySink>,
    settings: QueueSettings,
}

impl NotificationQueueService {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        sink: Arc<dyn DeliverySink>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            backend,
            sink,
            settings,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn queue_name(&self) -> &str {
        &self.settings.queue_name
    }

    pub fn dead_letter_queue_name(&self) -> &str {
        &self.settings.dead_letter_queue_name
    }

    pub fn retry_delay(&self, retry_count: u32) -> u64 {
        backoff_delay(
            self.settings.retry_base_delay_seconds,
            self.settings.retry_max_delay_seconds,
            retry_count,
        )
    }

    /// Create the dead-letter queue, then the main queue pointing at it.
    pub async fn ensure_queues(&self) -> Result<(), QueueError> {
        if !self.settings.enabled {
            return Ok(());
        }

        self.backend
            .create(
                &self.settings.dead_letter_queue_name,
                &QueueConfig {
                    visibility_timeout_seconds: self.settings.dead_letter_visibility_timeout_seconds,
                    retention_period_seconds: self.settings.retention_period_seconds,
                    dead_letter_target: None,
                    max_receive_count: self.settings.max_receive_count,
                },
            )
            .await?;

        self.backend
            .create(
                &self.settings.queue_name,
                &QueueConfig {
                    visibility_timeout_seconds: self.settings.visibility_timeout_seconds,
                    retention_period_seconds: self.settings.retention_period_seconds,
                    dead_letter_target: Some(self.settings.dead_letter_queue_name.clone()),
                    max_receive_count: self.settings.max_receive_count,
                },
            )
            .await?;

        tracing::info!(
            "Notification queues ready: {} (dead letters -> {})",
            self.settings.queue_name,
            self.settings.dead_letter_queue_name
        );
        Ok(())
    }

    /// Queue a notification for delivery.
    ///
    /// When queueing is disabled or the backend rejects the send, a single
    /// direct delivery is attempted instead and its outcome returned. That
    /// fallback is not retried.
    pub async fn queue_notification(
        &self,
        notification: NotificationPayload,
        delay_seconds: u64,
        priority: Priority,
    ) -> bool {
        if !self.settings.enabled {
            tracing::debug!("Queueing disabled; delivering '{}' directly", notification.subject);
            return self.deliver_direct(&notification).await;
        }

        let envelope =
            QueueMessage::new_notification(notification.clone(), priority, self.settings.max_retries);
        let body = match envelope.to_body() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to serialize envelope {}: {}", envelope.id, e);
                return self.deliver_direct(&notification).await;
            }
        };

        match self
            .backend
            .send(
                &self.settings.queue_name,
                &body,
                delay_seconds.min(MAX_DELAY_SECONDS),
            )
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "Queued notification {} for {} (priority={}, delay={}s)",
                    envelope.id,
                    if notification.is_broadcast() {
                        "all subscribers"
                    } else {
                        notification.recipient.as_str()
                    },
                    priority.as_str(),
                    delay_seconds
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to queue notification {}: {}; falling back to direct delivery",
                    envelope.id,
                    e
                );
                self.deliver_direct(&notification).await
            }
        }
    }

    async fn deliver_direct(&self, notification: &NotificationPayload) -> bool {
        match self
            .sink
            .deliver(
                &notification.recipient,
                &notification.subject,
                &notification.message,
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Direct delivery to {} failed: {}", notification.recipient, e);
                false
            }
        }
    }

    /// Receive up to `batch_size` envelopes from the main queue and process each.
    ///
    /// Per-message failures end up in the returned counters; only a failed
    /// receive is returned as an error.
    pub async fn process_batch(&self, batch_size: usize) -> Result<BatchResult, QueueError> {
        if !self.settings.enabled {
            return Err(QueueError::Disabled);
        }

        let messages = self
            .backend
            .receive(
                &self.settings.queue_name,
                batch_size.clamp(1, MAX_BATCH_SIZE),
                self.settings.receive_wait_seconds,
            )
            .await?;

        let mut result = BatchResult::default();
        for received in messages {
            result.processed += 1;
            match self.process_message(&received).await {
                MessageOutcome::Delivered => result.successful += 1,
                MessageOutcome::Retried => result.retried += 1,
                MessageOutcome::Failed(e) => {
                    result.failed += 1;
                    result.errors.push(e.to_string());
                }
            }
        }

        if result.processed > 0 {
            tracing::info!(
                "Processed notification batch: processed={}, successful={}, retried={}, failed={}",
                result.processed,
                result.successful,
                result.retried,
                result.failed
            );
        }
        Ok(result)
    }

    async fn process_message(&self, received: &ReceivedMessage) -> MessageOutcome {
        let main = &self.settings.queue_name;

        let parsed = QueueMessage::from_body(&received.body)
            .and_then(|envelope| envelope.notification_payload().map(|p| (envelope, p)));
        let (envelope, payload) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Dropping malformed message {}: {}", received.message_id, e);
                self.acknowledge(main, received).await;
                return MessageOutcome::Failed(e);
            }
        };

        let notification = payload.notification;
        let delivery = self
            .sink
            .deliver(
                &notification.recipient,
                &notification.subject,
                &notification.message,
            )
            .await;

        match delivery {
            Ok(()) => {
                self.acknowledge(main, received).await;
                tracing::info!(
                    "Delivered notification {} to {} (retry_count={})",
                    envelope.id,
                    notification.recipient,
                    envelope.retry_count
                );
                MessageOutcome::Delivered
            }
            Err(e) if !envelope.retries_exhausted() => self.schedule_retry(envelope, received, e).await,
            Err(e) => {
                self.dead_letter(envelope, received, &notification.recipient, e)
                    .await
            }
        }
    }

    /// Resend the envelope with one more retry and a backoff delay, then drop the original.
    async fn schedule_retry(
        &self,
        mut envelope: QueueMessage,
        received: &ReceivedMessage,
        error: QueueError,
    ) -> MessageOutcome {
        let main = &self.settings.queue_name;

        envelope.retry_count += 1;
        envelope.error_message = Some(format!("Delivery failed, retrying: {}", error));
        let delay = self.retry_delay(envelope.retry_count);

        let sent = match envelope.to_body() {
            Ok(body) => self.backend.send(main, &body, delay).await,
            Err(e) => Err(e),
        };

        // The original stays in flight and reappears after its visibility
        // timeout when the resend fails.
        if let Err(e) = sent {
            tracing::warn!("Failed to requeue notification {}: {}", envelope.id, e);
            return MessageOutcome::Failed(e);
        }

        self.acknowledge(main, received).await;
        tracing::info!(
            "Notification {} failed ({}); retry {}/{} in {}s",
            envelope.id,
            error,
            envelope.retry_count,
            envelope.max_retries,
            delay
        );
        MessageOutcome::Retried
    }

    /// Move an envelope that used its whole retry budget to the dead-letter queue.
    async fn dead_letter(
        &self,
        mut envelope: QueueMessage,
        received: &ReceivedMessage,
        recipient: &str,
        error: QueueError,
    ) -> MessageOutcome {
        let main = &self.settings.queue_name;
        let dlq = &self.settings.dead_letter_queue_name;

        envelope.error_message = Some(format!("Max retries exceeded: {}", error));
        let sent = match envelope.to_body() {
            Ok(body) => self.backend.send(dlq, &body, 0).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(()) => {
                self.acknowledge(main, received).await;
                tracing::warn!(
                    "Notification {} exhausted {} retries; moved to {}",
                    envelope.id,
                    envelope.max_retries,
                    dlq
                );
            }
            Err(e) => {
                // Left in flight; the main queue's redrive policy picks it up.
                tracing::warn!(
                    "Failed to dead-letter notification {}: {}; leaving it for redrive",
                    envelope.id,
                    e
                );
            }
        }

        MessageOutcome::Failed(QueueError::RetriesExhausted {
            recipient: recipient.to_string(),
            retries: envelope.retry_count,
        })
    }

    async fn acknowledge(&self, queue: &str, received: &ReceivedMessage) {
        if let Err(e) = self.backend.delete(queue, &received.receipt_handle).await {
            // The message will be received again: at-least-once.
            tracing::warn!(
                "Failed to delete message {} from {}: {}",
                received.message_id,
                queue,
                e
            );
        }
    }

    /// Move up to `max_messages` envelopes from the dead-letter queue back to
    /// the main queue with a fresh retry budget.
    pub async fn requeue_from_dead_letter(
        &self,
        max_messages: usize,
    ) -> Result<RequeueResult, QueueError> {
        if !self.settings.enabled {
            return Err(QueueError::Disabled);
        }

        let main = &self.settings.queue_name;
        let dlq = &self.settings.dead_letter_queue_name;

        let messages = self
            .backend
            .receive(
                dlq,
                max_messages.clamp(1, MAX_BATCH_SIZE),
                self.settings.receive_wait_seconds,
            )
            .await?;
        let received_count = messages.len() as u64;

        let mut result = RequeueResult::default();
        for received in messages {
            let mut envelope = match QueueMessage::from_body(&received.body) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!("Skipping malformed dead letter {}: {}", received.message_id, e);
                    result.errors.push(e.to_string());
                    continue;
                }
            };

            envelope.retry_count = 0;
            envelope.error_message = Some(REQUEUE_MARKER.to_string());

            let sent = match envelope.to_body() {
                Ok(body) => self.backend.send(main, &body, 0).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => {
                    // A failed delete leaves a copy that the next requeue sends again.
                    self.acknowledge(dlq, &received).await;
                    result.requeued += 1;
                    tracing::info!("Requeued notification {} from {}", envelope.id, dlq);
                }
                Err(e) => {
                    tracing::warn!("Failed to requeue dead letter {}: {}", envelope.id, e);
                    result.errors.push(e.to_string());
                }
            }
        }

        result.available_in_dlq = match self.backend.stats(dlq).await {
            Ok(stats) => {
                stats.visible_messages + stats.in_flight_messages + stats.delayed_messages
            }
            Err(e) => {
                tracing::warn!("Failed to read stats for {}: {}", dlq, e);
                received_count.saturating_sub(result.requeued as u64)
            }
        };

        Ok(result)
    }

    /// Counts for both queues. A queue whose stats cannot be read is left out.
    pub async fn get_stats(&self) -> StatsReport {
        if !self.settings.enabled {
            return StatsReport {
                status: SubsystemStatus::Disabled,
                pending: 0,
                failed: 0,
                queues: Vec::new(),
            };
        }

        let main = self.queue_details(&self.settings.queue_name).await;
        let dlq = self.queue_details(&self.settings.dead_letter_queue_name).await;

        StatsReport {
            status: SubsystemStatus::Enabled,
            pending: main.as_ref().map(|d| d.stats.visible_messages).unwrap_or(0),
            failed: dlq.as_ref().map(|d| d.stats.visible_messages).unwrap_or(0),
            queues: main.into_iter().chain(dlq).collect(),
        }
    }

    async fn queue_details(&self, name: &str) -> Option<QueueDetails> {
        match self.backend.stats(name).await {
            Ok(stats) => Some(QueueDetails {
                name: name.to_string(),
                stats,
            }),
            Err(e) => {
                tracing::warn!("Failed to read stats for {}: {}", name, e);
                None
            }
        }
    }

    /// Notification queues known to the backend with their current counts.
    pub async fn list_queues(&self) -> Result<Vec<QueueDetails>, QueueError> {
        if !self.settings.enabled {
            return Err(QueueError::Disabled);
        }

        let mut details = Vec::new();
        for name in self.backend.list(QUEUE_LIST_PREFIX).await? {
            if let Some(d) = self.queue_details(&name).await {
                details.push(d);
            }
        }
        Ok(details)
    }

    /// Remove every message from one of the two notification queues.
    pub async fn purge(&self, queue_name: &str) -> Result<(), QueueError> {
        if !self.settings.enabled {
            return Err(QueueError::Disabled);
        }
        if queue_name != self.settings.queue_name
            && queue_name != self.settings.dead_letter_queue_name
        {
            return Err(QueueError::PurgeForbidden(queue_name.to_string()));
        }

        self.backend.purge(queue_name).await?;
        tracing::warn!("Queue {} purged", queue_name);
        Ok(())
    }

    pub async fn health(&self) -> HealthReport {
        if !self.settings.enabled {
            return HealthReport {
                status: HealthStatus::Disabled,
                main_queue_reachable: false,
                dead_letter_queue_reachable: false,
            };
        }

        let main_ok = self.backend.stats(&self.settings.queue_name).await.is_ok();
        let dlq_ok = self
            .backend
            .stats(&self.settings.dead_letter_queue_name)
            .await
            .is_ok();

        HealthReport {
            status: if main_ok && dlq_ok {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            main_queue_reachable: main_ok,
            dead_letter_queue_reachable: dlq_ok,
        }
    }
}
