use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::models::{NotificationPayload, Priority};
use crate::error::{AppError, AppErrorWithDetails, AppResult};
use crate::services::notification_queue::{
    BatchResult, HealthReport, QueueDetails, RequeueResult, StatsReport, MAX_BATCH_SIZE,
    MAX_DELAY_SECONDS,
};
use crate::services::worker::{WorkerState, WorkerStats};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(overview))
        .route("/stats", get(get_stats))
        .route("/notification", post(queue_notification))
        .route("/events", post(publish_event))
        .route("/process", post(process_batch))
        .route("/requeue", post(requeue))
        .route("/worker/stats", get(worker_stats))
        .route("/worker/start", post(start_worker))
        .route("/worker/stop", post(stop_worker))
        .route("/health", get(health))
        .route("/queues", get(list_queues))
        .route("/purge/:queue_name", delete(purge_queue))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub enabled: bool,
    pub queue_name: String,
    pub dead_letter_queue_name: String,
    pub endpoints: Vec<&'static str>,
}

fn default_notification_type() -> String {
    "product_notification".to_string()
}

#[derive(Debug, Deserialize)]
pub struct QueueNotificationRequest {
    pub recipient: String,
    pub subject: String,
    pub message: String,
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
    #[serde(default)]
    pub delay_seconds: u64,
    pub priority: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueNotificationResponse {
    pub queued: bool,
    pub recipient: String,
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessQuery {
    pub batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RequeueRequest {
    pub max_messages: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StartWorkerQuery {
    pub batch_size: Option<usize>,
    pub poll_interval_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StartWorkerResponse {
    pub started: bool,
    pub state: WorkerState,
}

#[derive(Debug, Serialize)]
pub struct StopWorkerResponse {
    pub acknowledged: bool,
    pub state: WorkerState,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: String,
}

// ============================================================================
// Validation
// ============================================================================

fn validate_batch_size(name: &str, value: usize) -> Result<usize, AppErrorWithDetails> {
    if !(1..=MAX_BATCH_SIZE).contains(&value) {
        return Err(AppError::Validation(format!(
            "{} must be between 1 and {}",
            name, MAX_BATCH_SIZE
        ))
        .with_details(serde_json::json!({
            "field": name,
            "value": value,
            "min": 1,
            "max": MAX_BATCH_SIZE
        })));
    }
    Ok(value)
}

fn require_non_empty(name: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", name)));
    }
    Ok(())
}

fn parse_priority(value: Option<&str>) -> AppResult<Priority> {
    match value {
        Some(p) => p.parse().map_err(AppError::Validation),
        None => Ok(Priority::default()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn overview(State(state): State<Arc<AppState>>) -> Json<OverviewResponse> {
    Json(OverviewResponse {
        enabled: state.queue.is_enabled(),
        queue_name: state.queue.queue_name().to_string(),
        dead_letter_queue_name: state.queue.dead_letter_queue_name().to_string(),
        endpoints: vec![
            "GET /stats",
            "POST /notification",
            "POST /events",
            "POST /process",
            "POST /requeue",
            "GET /worker/stats",
            "POST /worker/start",
            "POST /worker/stop",
            "GET /health",
            "GET /queues",
            "DELETE /purge/:queue_name",
        ],
    })
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsReport> {
    Json(state.queue.get_stats().await)
}

async fn queue_notification(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueueNotificationRequest>,
) -> AppResult<Json<QueueNotificationResponse>> {
    require_non_empty("recipient", &body.recipient)?;
    require_non_empty("subject", &body.subject)?;
    require_non_empty("message", &body.message)?;
    if body.delay_seconds > MAX_DELAY_SECONDS {
        return Err(AppError::Validation(format!(
            "delay_seconds must not exceed {}",
            MAX_DELAY_SECONDS
        )));
    }
    let priority = parse_priority(body.priority.as_deref())?;

    let recipient = body.recipient.clone();
    let queued = state
        .queue
        .queue_notification(
            NotificationPayload {
                recipient: body.recipient,
                subject: body.subject,
                message: body.message,
                notification_type: body.notification_type,
            },
            body.delay_seconds,
            priority,
        )
        .await;

    Ok(Json(QueueNotificationResponse {
        queued,
        recipient,
        priority,
    }))
}

async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PublishEventRequest>,
) -> AppResult<Json<Value>> {
    require_non_empty("action", &body.action)?;
    require_non_empty("resource", &body.resource)?;
    let priority = parse_priority(body.priority.as_deref())?;

    let queued = state
        .publisher
        .notify(&body.action, &body.resource, &body.data, priority)
        .await;

    Ok(Json(serde_json::json!({ "queued": queued })))
}

async fn process_batch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProcessQuery>,
) -> Result<Json<BatchResult>, AppErrorWithDetails> {
    let batch_size = validate_batch_size(
        "batch_size",
        query.batch_size.unwrap_or(state.config.worker.batch_size),
    )?;
    Ok(Json(state.queue.process_batch(batch_size).await?))
}

async fn requeue(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RequeueRequest>,
) -> Result<Json<RequeueResult>, AppErrorWithDetails> {
    let max_messages =
        validate_batch_size("max_messages", body.max_messages.unwrap_or(MAX_BATCH_SIZE))?;
    Ok(Json(state.queue.requeue_from_dead_letter(max_messages).await?))
}

async fn worker_stats(State(state): State<Arc<AppState>>) -> Json<WorkerStats> {
    Json(state.worker.stats().await)
}

async fn start_worker(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StartWorkerQuery>,
) -> Result<Json<StartWorkerResponse>, AppErrorWithDetails> {
    let batch_size = validate_batch_size(
        "batch_size",
        query.batch_size.unwrap_or(state.config.worker.batch_size),
    )?;
    let poll_interval = query
        .poll_interval_seconds
        .unwrap_or(state.config.worker.poll_interval_seconds);
    if poll_interval == 0 {
        return Err(AppError::Validation("poll_interval_seconds must be positive".to_string()).into());
    }

    let started = state
        .worker
        .start(batch_size, Duration::from_secs(poll_interval))
        .await?;

    Ok(Json(StartWorkerResponse {
        started,
        state: state.worker.state().await,
    }))
}

async fn stop_worker(State(state): State<Arc<AppState>>) -> Json<StopWorkerResponse> {
    let acknowledged = state.worker.stop().await;
    Json(StopWorkerResponse {
        acknowledged,
        state: state.worker.state().await,
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.queue.health().await)
}

async fn list_queues(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<QueueDetails>>> {
    Ok(Json(state.queue.list_queues().await?))
}

async fn purge_queue(
    State(state): State<Arc<AppState>>,
    Path(queue_name): Path<String>,
) -> AppResult<Json<PurgeResponse>> {
    state.queue.purge(&queue_name).await?;
    Ok(Json(PurgeResponse { purged: queue_name }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::services::publisher::NotificationPublisher;
    use crate::services::test_support::{test_service, test_settings, ScriptedSink};
    use crate::services::worker::NotificationWorker;

    async fn test_app(enabled: bool) -> (Router, Arc<ScriptedSink>) {
        let mut settings = test_settings();
        settings.enabled = enabled;
        let (_backend, sink, service) = test_service(settings.clone()).await;

        let mut config = Config::default();
        config.queue = settings;
        let state = Arc::new(AppState {
            config,
            worker: NotificationWorker::new(service.clone()),
            publisher: NotificationPublisher::new(service.clone()),
            queue: service,
        });

        let app = Router::new()
            .nest("/api/queue", router())
            .with_state(state);
        (app, sink)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn queue_then_process() {
        let (app, sink) = test_app(true).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/queue/notification",
            Some(serde_json::json!({
                "recipient": "ops@example.com",
                "subject": "Low stock",
                "message": "Desk stock below 5",
                "priority": "high"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queued"], true);
        assert_eq!(body["priority"], "high");

        let (_, stats) = send(&app, "GET", "/api/queue/stats", None).await;
        assert_eq!(stats["status"], "enabled");
        assert_eq!(stats["pending"], 1);

        let (status, result) = send(&app, "POST", "/api/queue/process?batch_size=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["processed"], 1);
        assert_eq!(result["successful"], 1);
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_requests() {
        let (app, _) = test_app(true).await;

        let (status, body) = send(&app, "POST", "/api/queue/process?batch_size=11", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"]["value"], 11);

        let (status, _) = send(
            &app,
            "POST",
            "/api/queue/requeue",
            Some(serde_json::json!({ "max_messages": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(
            &app,
            "POST",
            "/api/queue/notification",
            Some(serde_json::json!({
                "recipient": "a@example.com",
                "subject": "s",
                "message": "m",
                "priority": "urgent"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("urgent"));

        let (status, _) = send(
            &app,
            "POST",
            "/api/queue/notification",
            Some(serde_json::json!({ "recipient": " ", "subject": "s", "message": "m" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn purge_of_foreign_queue_is_forbidden() {
        let (app, _) = test_app(true).await;

        let (status, body) = send(&app, "DELETE", "/api/queue/purge/orders", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let (status, body) = send(
            &app,
            "DELETE",
            "/api/queue/purge/notification-dead-letter-queue",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["purged"], "notification-dead-letter-queue");
    }

    #[tokio::test]
    async fn disabled_subsystem_is_reported() {
        let (app, sink) = test_app(false).await;

        let (status, body) = send(&app, "POST", "/api/queue/process", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "SUBSYSTEM_DISABLED");

        let (_, stats) = send(&app, "GET", "/api/queue/stats", None).await;
        assert_eq!(stats["status"], "disabled");

        // producers still get a direct delivery
        let (_, body) = send(
            &app,
            "POST",
            "/api/queue/events",
            Some(serde_json::json!({
                "action": "created",
                "resource": "product",
                "data": { "name": "Lamp" }
            })),
        )
        .await;
        assert_eq!(body["queued"], true);
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn worker_lifecycle_over_http() {
        let (app, _) = test_app(true).await;

        let (_, body) = send(&app, "POST", "/api/queue/worker/stop", None).await;
        assert_eq!(body["acknowledged"], false);

        let (status, body) = send(
            &app,
            "POST",
            "/api/queue/worker/start?batch_size=3&poll_interval_seconds=30",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["started"], true);
        assert_eq!(body["state"], "running");

        let (_, body) = send(&app, "POST", "/api/queue/worker/start", None).await;
        assert_eq!(body["started"], false);

        let (_, stats) = send(&app, "GET", "/api/queue/worker/stats", None).await;
        assert_eq!(stats["batch_size"], 3);

        let (_, body) = send(&app, "POST", "/api/queue/worker/stop", None).await;
        assert_eq!(body["acknowledged"], true);
    }

    #[tokio::test]
    async fn overview_health_and_queues() {
        let (app, _) = test_app(true).await;

        let (_, overview) = send(&app, "GET", "/api/queue", None).await;
        assert_eq!(overview["enabled"], true);
        assert_eq!(overview["queue_name"], "notification-processing-queue");

        let (_, health) = send(&app, "GET", "/api/queue/health", None).await;
        assert_eq!(health["status"], "healthy");

        let (status, queues) = send(&app, "GET", "/api/queue/queues", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(queues.as_array().unwrap().len(), 2);
        assert!(queues[0].get("visible_messages").is_some());
    }
}
