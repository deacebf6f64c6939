use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::QueueRecord;
use crate::db::repository::{CreateQueue, QueueMessageRepository, QueueRepository};
use crate::error::{AppError, QueueError};
use crate::services::queue_backend::{QueueBackend, QueueConfig, QueueStats, ReceivedMessage};

impl From<AppError> for QueueError {
    fn from(e: AppError) -> Self {
        QueueError::Backend(e.to_string())
    }
}

/// `at` shifted by `secs`, or an error when the result is not representable.
fn shifted(at: NaiveDateTime, secs: i64) -> Result<NaiveDateTime, QueueError> {
    Duration::try_seconds(secs)
        .and_then(|d| at.checked_add_signed(d))
        .ok_or_else(|| QueueError::Backend(format!("period of {}s is out of range", secs)))
}

fn to_i64(value: u64, field: &str) -> Result<i64, QueueError> {
    i64::try_from(value)
        .map_err(|_| QueueError::Backend(format!("{} of {} is out of range", field, value)))
}

/// Durable queue backend on top of the service's SQLite database.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn queue(&self, name: &str) -> Result<QueueRecord, QueueError> {
        QueueRepository::find_by_name(&self.pool, name)
            .await?
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    async fn discard_expired(&self, queue: &QueueRecord) -> Result<(), QueueError> {
        let cutoff = shifted(
            Utc::now().naive_utc(),
            queue.retention_period_seconds.saturating_neg(),
        )?;
        let discarded =
            QueueMessageRepository::discard_sent_before(&self.pool, &queue.name, cutoff).await?;
        if discarded > 0 {
            tracing::info!(
                "Discarded {} message(s) past retention from {}",
                discarded,
                queue.name
            );
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for SqliteBackend {
    async fn create(&self, name: &str, config: &QueueConfig) -> Result<(), QueueError> {
        let record = QueueRepository::create_if_missing(
            &self.pool,
            CreateQueue {
                name,
                visibility_timeout_seconds: to_i64(
                    config.visibility_timeout_seconds,
                    "visibility_timeout_seconds",
                )?,
                retention_period_seconds: to_i64(
                    config.retention_period_seconds,
                    "retention_period_seconds",
                )?,
                dead_letter_target: config.dead_letter_target.as_deref(),
                max_receive_count: i64::from(config.max_receive_count),
            },
        )
        .await?;

        tracing::debug!(
            "Queue {} ready (visibility={}s, dead_letter_target={:?})",
            record.name,
            record.visibility_timeout_seconds,
            record.dead_letter_target
        );
        Ok(())
    }

    async fn send(&self, queue: &str, body: &str, delay_seconds: u64) -> Result<(), QueueError> {
        let record = self.queue(queue).await?;
        let visible_at = shifted(
            Utc::now().naive_utc(),
            to_i64(delay_seconds, "delay_seconds")?,
        )?;
        QueueMessageRepository::insert(&self.pool, &record.name, body, visible_at).await?;
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait_seconds: u64,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let record = self.queue(queue).await?;
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(wait_seconds);
        loop {
            self.discard_expired(&record).await?;

            let now = Utc::now().naive_utc();
            if let Some(ref target) = record.dead_letter_target {
                let moved = QueueMessageRepository::redrive(
                    &self.pool,
                    &record.name,
                    target,
                    record.max_receive_count,
                    now,
                )
                .await?;
                if moved > 0 {
                    tracing::warn!(
                        "Redrove {} message(s) from {} to {}",
                        moved,
                        record.name,
                        target
                    );
                }
            }

            let invisible_until = shifted(now, record.visibility_timeout_seconds)?;
            let mut received = Vec::new();
            for _ in 0..max_messages {
                let claimed = QueueMessageRepository::claim_next(
                    &self.pool,
                    &record.name,
                    now,
                    invisible_until,
                )
                .await?;

                match claimed {
                    Some(row) => received.push(ReceivedMessage {
                        message_id: row.id,
                        receipt_handle: row.receipt_handle.unwrap_or_default(),
                        body: row.body,
                        receive_count: row.receive_count.max(0) as u32,
                    }),
                    None => break,
                }
            }

            if !received.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(received);
            }
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let removed =
            QueueMessageRepository::delete_by_receipt(&self.pool, queue, receipt_handle).await?;
        if !removed {
            tracing::debug!(
                "Delete on {} ignored: receipt handle {} is unknown or stale",
                queue,
                receipt_handle
            );
        }
        Ok(())
    }

    async fn purge(&self, queue: &str) -> Result<(), QueueError> {
        let record = self.queue(queue).await?;
        let purged = QueueMessageRepository::purge(&self.pool, &record.name).await?;
        tracing::warn!("Purged {} message(s) from {}", purged, record.name);
        Ok(())
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        let record = self.queue(queue).await?;
        self.discard_expired(&record).await?;

        let counts =
            QueueMessageRepository::counts(&self.pool, &record.name, Utc::now().naive_utc())
                .await?;

        Ok(QueueStats {
            visible_messages: counts.visible.max(0) as u64,
            in_flight_messages: counts.in_flight.max(0) as u64,
            delayed_messages: counts.delayed.max(0) as u64,
            created_timestamp: record.created_at.and_utc(),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, QueueError> {
        let queues = QueueRepository::list_by_prefix(&self.pool, prefix).await?;
        Ok(queues.into_iter().map(|q| q.name).collect())
    }
}
