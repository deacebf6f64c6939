//! Initialization helpers for the application:
//! - database connection + migrations
//! - queue backend, delivery sink and queue service wiring
//! - background worker start
//!
//! Keeps `main.rs` down to configuration, routing and shutdown.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Result;

use crate::config::{Config, QueueBackendKind};
use crate::services::delivery::sink_from_config;
use crate::services::memory_backend::InMemoryBackend;
use crate::services::notification_queue::NotificationQueueService;
use crate::services::queue_backend::QueueBackend;
use crate::services::sqlite_backend::SqliteBackend;
use crate::services::worker::NotificationWorker;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Userinfo (username:password) is dropped; anything unparseable is reduced
/// to the part after '@' or to "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", url.scheme(), host, port_part, url.path())
    } else if let Some(at_pos) = db_url.find('@') {
        format!("(redacted){}", &db_url[at_pos + 1..])
    } else {
        "(redacted)".to_string()
    }
}

/// Open the SQLite pool holding the durable queues and run migrations.
///
/// The parent directory of the database file is created when missing.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to queue database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Build the configured queue backend.
pub async fn init_backend(config: &Config) -> Result<Arc<dyn QueueBackend>> {
    match config.queue.backend {
        QueueBackendKind::Sqlite => {
            let pool = init_db(config).await?;
            Ok(Arc::new(SqliteBackend::new(pool)))
        }
        QueueBackendKind::Memory => {
            tracing::warn!("Using in-memory queue backend; queued notifications do not survive restarts");
            Ok(Arc::new(InMemoryBackend::new()))
        }
    }
}

/// Wire backend and delivery sink into the queue service and create its queues.
///
/// A failure to create the queues is logged; producers then fall back to
/// direct delivery until the backend recovers.
pub async fn init_queue_service(config: &Config) -> Result<Arc<NotificationQueueService>> {
    if !config.queue.enabled {
        tracing::warn!("Notification queueing disabled; notifications are delivered directly");
    }

    let backend = init_backend(config).await?;
    let sink = sink_from_config(&config.delivery)?;
    let service = Arc::new(NotificationQueueService::new(
        backend,
        sink,
        config.queue.clone(),
    ));

    if let Err(e) = service.ensure_queues().await {
        tracing::warn!("Failed to create notification queues: {}", e);
    }

    Ok(service)
}

/// Start the background worker if the queue is enabled and autostart is on.
pub async fn start_worker(config: &Config, worker: &NotificationWorker) -> bool {
    if !config.queue.enabled || !config.worker.autostart {
        tracing::info!("Notification worker not started automatically");
        return false;
    }

    match worker
        .start(
            config.worker.batch_size,
            Duration::from_secs(config.worker.poll_interval_seconds),
        )
        .await
    {
        Ok(started) => started,
        Err(e) => {
            tracing::warn!("Failed to start notification worker: {}", e);
            false
        }
    }
}
