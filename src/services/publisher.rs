use std::sync::Arc;

use serde_json::{Map, Value};

use crate::db::models::{NotificationPayload, Priority};
use crate::services::notification_queue::NotificationQueueService;

/// Turns resource change events (a product was created, a profile updated)
/// into broadcast notifications.
#[derive(Clone)]
pub struct NotificationPublisher {
    queue: Arc<NotificationQueueService>,
}

impl NotificationPublisher {
    pub fn new(queue: Arc<NotificationQueueService>) -> Self {
        Self { queue }
    }

    /// Queue one broadcast describing `action` on `resource`.
    pub async fn notify(
        &self,
        action: &str,
        resource: &str,
        data: &Map<String, Value>,
        priority: Priority,
    ) -> bool {
        let notification = build_notification(action, resource, data);
        let subject = notification.subject.clone();

        let queued = self.queue.queue_notification(notification, 0, priority).await;
        if queued {
            tracing::info!("Notification queued: {}", subject);
        } else {
            tracing::warn!("Failed to queue notification: {}", subject);
        }
        queued
    }
}

pub fn build_notification(
    action: &str,
    resource: &str,
    data: &Map<String, Value>,
) -> NotificationPayload {
    let name = data
        .get("name")
        .or_else(|| data.get("id"))
        .map(display_value)
        .unwrap_or_else(|| "Item".to_string());

    let subject = format!("{} {}: {}", title_case(resource), title_case(action), name);

    let details: Vec<String> = data
        .iter()
        .map(|(key, value)| format!("{}: {}", title_case(&key.replace('_', " ")), display_value(value)))
        .collect();
    let message = format!(
        "{} {}\n\n{}",
        resource.to_uppercase(),
        action.to_uppercase(),
        details.join("\n")
    );

    NotificationPayload::broadcast(subject, message)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Upper-case the first letter of every word, lower-case the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::BROADCAST_RECIPIENT;
    use crate::services::test_support::{test_service, test_settings};

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("product"), "Product");
        assert_eq!(title_case("in stock"), "In Stock");
        assert_eq!(title_case("UPDATED"), "Updated");
    }

    #[test]
    fn builds_broadcast_with_details() {
        let payload = build_notification(
            "created",
            "product",
            &data(serde_json::json!({
                "name": "Standing Desk",
                "in_stock": 12,
                "price": 499.5
            })),
        );

        assert_eq!(payload.recipient, BROADCAST_RECIPIENT);
        assert_eq!(payload.notification_type, "broadcast");
        assert_eq!(payload.subject, "Product Created: Standing Desk");
        assert_eq!(
            payload.message,
            "PRODUCT CREATED\n\nIn Stock: 12\nName: Standing Desk\nPrice: 499.5"
        );
    }

    #[test]
    fn subject_falls_back_to_id_then_item() {
        let with_id = build_notification("deleted", "profile", &data(serde_json::json!({ "id": 7 })));
        assert_eq!(with_id.subject, "Profile Deleted: 7");

        let anonymous = build_notification("updated", "product", &Map::new());
        assert_eq!(anonymous.subject, "Product Updated: Item");
        assert_eq!(anonymous.message, "PRODUCT UPDATED\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn notify_queues_one_message() {
        let (_backend, sink, service) = test_service(test_settings()).await;
        let publisher = NotificationPublisher::new(service.clone());

        assert!(
            publisher
                .notify(
                    "created",
                    "product",
                    &data(serde_json::json!({ "name": "Lamp" })),
                    Priority::High,
                )
                .await
        );
        assert_eq!(service.get_stats().await.pending, 1);
        assert_eq!(sink.calls(), 0);
    }
}
