use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::DeliveryConfig;
use crate::error::QueueError;

/// Transport that actually delivers a notification.
///
/// Delivery is at-least-once: implementations must tolerate receiving the
/// same notification more than once.
#[async_trait]
pub trait DeliverySink: Send + Sync + 'static {
    async fn deliver(&self, recipient: &str, subject: &str, message: &str)
        -> Result<(), QueueError>;
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    recipient: &'a str,
    subject: &'a str,
    message: &'a str,
}

/// Posts notifications as JSON to a broadcast endpoint.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueueError::Delivery(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver(
        &self,
        recipient: &str,
        subject: &str,
        message: &str,
    ) -> Result<(), QueueError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookBody {
                recipient,
                subject,
                message,
            })
            .send()
            .await
            .map_err(|e| QueueError::Delivery(format!("Failed to send: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueueError::Delivery(format!(
                "Broadcast endpoint returned {}",
                status
            )));
        }

        tracing::debug!("Delivered notification '{}' to {}", subject, recipient);
        Ok(())
    }
}

/// Development sink: logs the notification and reports success.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    async fn deliver(
        &self,
        recipient: &str,
        subject: &str,
        message: &str,
    ) -> Result<(), QueueError> {
        tracing::info!(
            recipient = %recipient,
            subject = %subject,
            bytes = message.len(),
            "Notification delivered to log sink"
        );
        Ok(())
    }
}

/// Pick the sink for the configured delivery settings.
pub fn sink_from_config(config: &DeliveryConfig) -> Result<Arc<dyn DeliverySink>, QueueError> {
    match config.webhook_url {
        Some(ref url) => {
            tracing::info!("Delivering notifications to webhook {}", url);
            Ok(Arc::new(WebhookSink::new(
                url.clone(),
                Duration::from_secs(config.timeout_seconds),
            )?))
        }
        None => {
            tracing::warn!("DELIVERY_WEBHOOK_URL not set; notifications will only be logged");
            Ok(Arc::new(LogSink))
        }
    }
}
