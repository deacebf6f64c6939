use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{QueueBackendKind, QueueSettings};
use crate::error::QueueError;
use crate::services::delivery::DeliverySink;
use crate::services::memory_backend::InMemoryBackend;
use crate::services::notification_queue::NotificationQueueService;
use crate::services::queue_backend::{QueueBackend, QueueConfig, QueueStats, ReceivedMessage};

/// Sink whose outcome is switched by the test.
#[derive(Default)]
pub struct ScriptedSink {
    failing: AtomicBool,
    failing_recipients: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedSink {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_recipient(&self, recipient: &str) {
        self.failing_recipients
            .lock()
            .unwrap()
            .push(recipient.to_string());
    }
}

#[async_trait]
impl DeliverySink for ScriptedSink {
    async fn deliver(
        &self,
        recipient: &str,
        _subject: &str,
        _message: &str,
    ) -> Result<(), QueueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let listed = self
            .failing_recipients
            .lock()
            .unwrap()
            .iter()
            .any(|r| r == recipient);
        if listed || self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Delivery("endpoint returned 503".to_string()));
        }
        Ok(())
    }
}

/// In-memory backend that rejects `send` or `delete` on one named queue.
pub struct FaultyBackend {
    inner: InMemoryBackend,
    failing_sends: Mutex<Option<String>>,
    failing_deletes: Mutex<Option<String>>,
}

impl FaultyBackend {
    pub fn new() -> Self {
        Self {
            inner: InMemoryBackend::new(),
            failing_sends: Mutex::new(None),
            failing_deletes: Mutex::new(None),
        }
    }

    pub fn fail_sends_to(&self, queue: &str) {
        *self.failing_sends.lock().unwrap() = Some(queue.to_string());
    }

    pub fn fail_deletes_on(&self, queue: &str) {
        *self.failing_deletes.lock().unwrap() = Some(queue.to_string());
    }

    pub fn heal(&self) {
        *self.failing_sends.lock().unwrap() = None;
        *self.failing_deletes.lock().unwrap() = None;
    }

    fn rejects(slot: &Mutex<Option<String>>, queue: &str) -> Result<(), QueueError> {
        if slot.lock().unwrap().as_deref() == Some(queue) {
            return Err(QueueError::Backend(format!("{} is unavailable", queue)));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for FaultyBackend {
    async fn create(&self, name: &str, config: &QueueConfig) -> Result<(), QueueError> {
        self.inner.create(name, config).await
    }

    async fn send(&self, queue: &str, body: &str, delay_seconds: u64) -> Result<(), QueueError> {
        Self::rejects(&self.failing_sends, queue)?;
        self.inner.send(queue, body, delay_seconds).await
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait_seconds: u64,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.inner.receive(queue, max_messages, wait_seconds).await
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError> {
        Self::rejects(&self.failing_deletes, queue)?;
        self.inner.delete(queue, receipt_handle).await
    }

    async fn purge(&self, queue: &str) -> Result<(), QueueError> {
        self.inner.purge(queue).await
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        self.inner.stats(queue).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, QueueError> {
        self.inner.list(prefix).await
    }
}

/// Default settings with an in-memory backend and no receive wait.
pub fn test_settings() -> QueueSettings {
    QueueSettings {
        backend: QueueBackendKind::Memory,
        receive_wait_seconds: 0,
        ..QueueSettings::default()
    }
}

pub async fn test_service(
    settings: QueueSettings,
) -> (
    Arc<InMemoryBackend>,
    Arc<ScriptedSink>,
    Arc<NotificationQueueService>,
) {
    let backend = Arc::new(InMemoryBackend::new());
    let sink = Arc::new(ScriptedSink::default());
    let service = Arc::new(NotificationQueueService::new(
        backend.clone(),
        sink.clone(),
        settings,
    ));
    service.ensure_queues().await.unwrap();
    (backend, sink, service)
}

pub async fn faulty_service(
    settings: QueueSettings,
) -> (
    Arc<FaultyBackend>,
    Arc<ScriptedSink>,
    Arc<NotificationQueueService>,
) {
    let backend = Arc::new(FaultyBackend::new());
    let sink = Arc::new(ScriptedSink::default());
    let service = Arc::new(NotificationQueueService::new(
        backend.clone(),
        sink.clone(),
        settings,
    ));
    service.ensure_queues().await.unwrap();
    (backend, sink, service)
}
