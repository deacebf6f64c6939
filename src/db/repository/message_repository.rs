use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{QueueCounts, StoredMessage};
use crate::error::{AppError, AppResult};

/// Repository for queued message rows.
///
/// Implementation notes:
/// - Receiving claims one row per statement with
///   `UPDATE ... WHERE id = (SELECT id ... LIMIT 1) RETURNING ...`, so no
///   long-lived transaction blocks producers.
/// - A claim hides the row by moving `visible_at` forward; nothing else marks
///   a message as in flight.
pub struct QueueMessageRepository;

impl QueueMessageRepository {
    pub async fn insert(
        pool: &SqlitePool,
        queue_name: &str,
        body: &str,
        visible_at: NaiveDateTime,
    ) -> AppResult<StoredMessage> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, StoredMessage>(
            r#"
            INSERT INTO queue_messages (
                id,
                queue_name,
                body,
                receipt_handle,
                receive_count,
                visible_at,
                sent_at
            ) VALUES (?, ?, ?, NULL, 0, ?, ?)
            RETURNING
                id,
                queue_name,
                body,
                receipt_handle,
                receive_count,
                visible_at,
                sent_at
            "#,
        )
        .bind(id)
        .bind(queue_name)
        .bind(body)
        .bind(visible_at)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Drop messages sent before `cutoff`.
    pub async fn discard_sent_before(
        pool: &SqlitePool,
        queue_name: &str,
        cutoff: NaiveDateTime,
    ) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE queue_name = ? AND sent_at <= ?")
            .bind(queue_name)
            .bind(cutoff)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Move visible messages received `max_receive_count` times to `target`.
    pub async fn redrive(
        pool: &SqlitePool,
        queue_name: &str,
        target: &str,
        max_receive_count: i64,
        now: NaiveDateTime,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET queue_name = ?, receipt_handle = NULL, receive_count = 0
            WHERE queue_name = ?
              AND visible_at <= ?
              AND receive_count >= ?
            "#,
        )
        .bind(target)
        .bind(queue_name)
        .bind(now)
        .bind(max_receive_count)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Claim the oldest visible message, hiding it until `invisible_until`.
    pub async fn claim_next(
        pool: &SqlitePool,
        queue_name: &str,
        now: NaiveDateTime,
        invisible_until: NaiveDateTime,
    ) -> AppResult<Option<StoredMessage>> {
        let receipt_handle = Uuid::new_v4().to_string();

        sqlx::query_as::<_, StoredMessage>(
            r#"
            UPDATE queue_messages
            SET receipt_handle = ?,
                receive_count = receive_count + 1,
                visible_at = ?
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE queue_name = ?
                  AND visible_at <= ?
                ORDER BY visible_at ASC, sent_at ASC
                LIMIT 1
            )
            RETURNING
                id,
                queue_name,
                body,
                receipt_handle,
                receive_count,
                visible_at,
                sent_at
            "#,
        )
        .bind(receipt_handle)
        .bind(invisible_until)
        .bind(queue_name)
        .bind(now)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Delete the message holding `receipt_handle`. Returns whether a row was removed.
    pub async fn delete_by_receipt(
        pool: &SqlitePool,
        queue_name: &str,
        receipt_handle: &str,
    ) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM queue_messages WHERE queue_name = ? AND receipt_handle = ?")
                .bind(queue_name)
                .bind(receipt_handle)
                .execute(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn purge(pool: &SqlitePool, queue_name: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE queue_name = ?")
            .bind(queue_name)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    pub async fn counts(
        pool: &SqlitePool,
        queue_name: &str,
        now: NaiveDateTime,
    ) -> AppResult<QueueCounts> {
        sqlx::query_as::<_, QueueCounts>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN visible_at <= ? THEN 1 ELSE 0 END), 0) AS visible,
                COALESCE(SUM(CASE WHEN visible_at > ? AND receipt_handle IS NOT NULL THEN 1 ELSE 0 END), 0) AS in_flight,
                COALESCE(SUM(CASE WHEN visible_at > ? AND receipt_handle IS NULL THEN 1 ELSE 0 END), 0) AS delayed
            FROM queue_messages
            WHERE queue_name = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(queue_name)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }
}
