use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::QueueRecord;
use crate::error::{AppError, AppResult};

/// Data required to register a queue.
#[derive(Debug, Clone)]
pub struct CreateQueue<'a> {
    pub name: &'a str,
    pub visibility_timeout_seconds: i64,
    pub retention_period_seconds: i64,
    pub dead_letter_target: Option<&'a str>,
    pub max_receive_count: i64,
}

pub struct QueueRepository;

impl QueueRepository {
    /// Register a queue unless one with the same name exists.
    ///
    /// Returns the stored record, which keeps its original settings when the
    /// queue was already present.
    pub async fn create_if_missing(
        pool: &SqlitePool,
        queue: CreateQueue<'_>,
    ) -> AppResult<QueueRecord> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO queues (
                name,
                visibility_timeout_seconds,
                retention_period_seconds,
                dead_letter_target,
                max_receive_count,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(queue.name)
        .bind(queue.visibility_timeout_seconds)
        .bind(queue.retention_period_seconds)
        .bind(queue.dead_letter_target)
        .bind(queue.max_receive_count)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Self::find_by_name(pool, queue.name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("queue {}", queue.name)))
    }

    pub async fn find_by_name(pool: &SqlitePool, name: &str) -> AppResult<Option<QueueRecord>> {
        sqlx::query_as::<_, QueueRecord>(
            r#"
            SELECT
                name,
                visibility_timeout_seconds,
                retention_period_seconds,
                dead_letter_target,
                max_receive_count,
                created_at
            FROM queues
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// List queues whose name starts with `prefix`, ordered by name.
    pub async fn list_by_prefix(pool: &SqlitePool, prefix: &str) -> AppResult<Vec<QueueRecord>> {
        sqlx::query_as::<_, QueueRecord>(
            r#"
            SELECT
                name,
                visibility_timeout_seconds,
                retention_period_seconds,
                dead_letter_target,
                max_receive_count,
                created_at
            FROM queues
            WHERE instr(name, ?) = 1
            ORDER BY name ASC
            "#,
        )
        .bind(prefix)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
