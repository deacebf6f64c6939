//! Background worker draining the notification queue.
//!
//! The worker is a small state machine (`Stopped -> Running -> Stopping ->
//! Stopped`). A stop request is only honoured between batches, so a batch
//! that has started always runs to completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::QueueError;
use crate::services::notification_queue::{BatchResult, NotificationQueueService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Stopped,
    Running,
    Stopping,
}

/// Cumulative counters since process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub state: WorkerState,
    pub batch_size: usize,
    pub poll_interval_seconds: u64,
    pub batches: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub retried: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            state: WorkerState::Stopped,
            batch_size: 0,
            poll_interval_seconds: 0,
            batches: 0,
            processed: 0,
            successful: 0,
            failed: 0,
            retried: 0,
            last_run_at: None,
            last_error: None,
        }
    }
}

impl WorkerStats {
    fn record(&mut self, result: &BatchResult) {
        self.batches += 1;
        self.processed += u64::from(result.processed);
        self.successful += u64::from(result.successful);
        self.failed += u64::from(result.failed);
        self.retried += u64::from(result.retried);
        self.last_run_at = Some(Utc::now());
        self.last_error = None;
    }
}

#[derive(Clone)]
pub struct NotificationWorker {
    service: Arc<NotificationQueueService>,
    stats: Arc<RwLock<WorkerStats>>,
    stop_tx: broadcast::Sender<()>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl NotificationWorker {
    pub fn new(service: Arc<NotificationQueueService>) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            service,
            stats: Arc::new(RwLock::new(WorkerStats::default())),
            stop_tx,
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    pub async fn state(&self) -> WorkerState {
        self.stats.read().await.state
    }

    /// Spawn the polling loop.
    ///
    /// Returns `Ok(false)` when a worker is already running or still stopping.
    pub async fn start(&self, batch_size: usize, poll_interval: Duration) -> Result<bool, QueueError> {
        if !self.service.is_enabled() {
            return Err(QueueError::Disabled);
        }

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = task.take() {
                // A loop that panicked never reset the state on its way out.
                if let Err(e) = handle.await {
                    tracing::error!("Notification worker task failed: {}", e);
                    self.stats.write().await.state = WorkerState::Stopped;
                }
            }
        }

        // Subscribe before going Running so no stop request can be missed.
        let mut stop_rx = self.stop_tx.subscribe();
        {
            let mut stats = self.stats.write().await;
            if stats.state != WorkerState::Stopped {
                tracing::debug!("Worker start ignored; state is {:?}", stats.state);
                return Ok(false);
            }
            stats.state = WorkerState::Running;
            stats.batch_size = batch_size;
            stats.poll_interval_seconds = poll_interval.as_secs();
        }

        tracing::info!(
            "Notification worker started (batch_size={}, poll_interval={}s)",
            batch_size,
            poll_interval.as_secs()
        );

        let service = self.service.clone();
        let stats = self.stats.clone();
        let handle = tokio::spawn(async move {
            loop {
                if stats.read().await.state != WorkerState::Running {
                    break;
                }

                match service.process_batch(batch_size).await {
                    Ok(result) => stats.write().await.record(&result),
                    Err(e) => {
                        // Backend unreachable: keep polling.
                        tracing::warn!("Notification batch failed: {}", e);
                        let mut stats = stats.write().await;
                        stats.batches += 1;
                        stats.last_run_at = Some(Utc::now());
                        stats.last_error = Some(e.to_string());
                    }
                }

                if stats.read().await.state != WorkerState::Running {
                    break;
                }

                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Notification worker received stop signal");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }

            stats.write().await.state = WorkerState::Stopped;
            tracing::info!("Notification worker stopped");
        });

        *task = Some(handle);
        Ok(true)
    }

    /// Ask a running worker to stop after its current batch.
    ///
    /// Returns `true` if a running worker acknowledged the request.
    pub async fn stop(&self) -> bool {
        let mut stats = self.stats.write().await;
        if stats.state != WorkerState::Running {
            return false;
        }
        stats.state = WorkerState::Stopping;
        let _ = self.stop_tx.send(());
        tracing::info!("Notification worker stopping after current batch");
        true
    }

    /// Stop the worker and wait up to `timeout` for the loop to exit.
    ///
    /// Returns `false` if the loop was still busy when the timeout expired.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.stop().await;

        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::error!("Notification worker task failed: {}", e);
                    self.stats.write().await.state = WorkerState::Stopped;
                    true
                }
                Err(_) => false,
            },
            None => true,
        }
    }
}
