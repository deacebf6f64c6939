use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Recipient value that means "every subscriber of the broadcast topic".
pub const BROADCAST_RECIPIENT: &str = "all_subscribers";

/// `message_type` stamped on notification envelopes.
pub const NOTIFICATION_MESSAGE_TYPE: &str = "email_notification";

/// What a producer wants delivered. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub recipient: String,
    pub subject: String,
    pub message: String,
    pub notification_type: String,
}

impl NotificationPayload {
    pub fn broadcast(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            recipient: BROADCAST_RECIPIENT.to_string(),
            subject: subject.into(),
            message: message.into(),
            notification_type: "broadcast".to_string(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient == BROADCAST_RECIPIENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("Unknown priority: {}", other)),
        }
    }
}

/// Typed view of an envelope's `payload` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub notification: NotificationPayload,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
}

/// Envelope stored in the queue: a notification plus retry bookkeeping.
///
/// `payload` is kept as raw JSON so an envelope whose body no longer matches
/// [`MessagePayload`] can still be received, inspected and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl QueueMessage {
    pub fn new_notification(
        notification: NotificationPayload,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        let payload = MessagePayload {
            notification,
            priority,
            queued_at: now,
        };

        Self {
            id: Uuid::new_v4().to_string(),
            message_type: NOTIFICATION_MESSAGE_TYPE.to_string(),
            // A struct of strings and an enum always serializes.
            payload: serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
            retry_count: 0,
            max_retries,
            created_at: now,
            error_message: None,
        }
    }

    /// Parse a raw queue body into an envelope.
    pub fn from_body(body: &str) -> Result<Self, QueueError> {
        serde_json::from_str(body).map_err(|e| QueueError::Malformed(e.to_string()))
    }

    pub fn to_body(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Malformed(e.to_string()))
    }

    /// Deserialize the embedded payload.
    pub fn notification_payload(&self) -> Result<MessagePayload, QueueError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| QueueError::Malformed(format!("message {}: {}", self.id, e)))
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_envelope_starts_without_retries() {
        let msg = QueueMessage::new_notification(
            NotificationPayload::broadcast("Product Created: Lamp", "PRODUCT CREATED"),
            Priority::High,
            3,
        );

        assert_eq!(msg.retry_count, 0);
        assert_eq!(msg.max_retries, 3);
        assert_eq!(msg.message_type, NOTIFICATION_MESSAGE_TYPE);
        assert!(msg.error_message.is_none());

        let payload = msg.notification_payload().unwrap();
        assert_eq!(payload.priority, Priority::High);
        assert!(payload.notification.is_broadcast());
    }

    #[test]
    fn body_without_notification_is_malformed() {
        let body = r#"{
            "id": "m-1",
            "message_type": "email_notification",
            "payload": {"priority": "normal"},
            "retry_count": 0,
            "max_retries": 3,
            "created_at": "2026-01-01T00:00:00Z"
        }"#;

        let msg = QueueMessage::from_body(body).unwrap();
        assert!(matches!(
            msg.notification_payload(),
            Err(QueueError::Malformed(_))
        ));
    }

    #[test]
    fn garbage_body_is_malformed() {
        assert!(matches!(
            QueueMessage::from_body("not json"),
            Err(QueueError::Malformed(_))
        ));
    }

    #[test]
    fn priority_rejects_unknown_values() {
        assert_eq!("low".parse::<Priority>(), Ok(Priority::Low));
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::default().as_str(), "normal");
    }
}
