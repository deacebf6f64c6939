use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Failures of the notification pipeline.
///
/// Per-message variants (`Malformed`, `Delivery`, `RetriesExhausted`) are folded
/// into batch statistics and never escape the worker; the rest reach callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Infrastructure failure of the queue backend. Retried on the next scheduled run.
    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Max retries exceeded for {recipient} after {retries} retries")]
    RetriesExhausted { recipient: String, retries: u32 },

    #[error("Notification queueing is disabled")]
    Disabled,

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Cannot purge queue: {0}")]
    PurgeForbidden(String),
}

impl QueueError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Backend(_) => "QUEUE_ERROR",
            QueueError::Malformed(_) => "MALFORMED_MESSAGE",
            QueueError::Delivery(_) => "DELIVERY_FAILED",
            QueueError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            QueueError::Disabled => "SUBSYSTEM_DISABLED",
            QueueError::QueueNotFound(_) => "NOT_FOUND",
            QueueError::PurgeForbidden(_) => "FORBIDDEN",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            AppError::Queue(e) => {
                let status = match e {
                    QueueError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
                    QueueError::PurgeForbidden(_) => StatusCode::FORBIDDEN,
                    QueueError::QueueNotFound(_) => StatusCode::NOT_FOUND,
                    QueueError::Malformed(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    QueueError::Backend(msg) => {
                        tracing::error!("Queue backend error: {}", msg);
                        StatusCode::BAD_GATEWAY
                    }
                    QueueError::Delivery(_) | QueueError::RetriesExhausted { .. } => {
                        StatusCode::BAD_GATEWAY
                    }
                };
                (status, e.code(), e.to_string())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        }
    }

    pub fn with_details(self, details: serde_json::Value) -> AppErrorWithDetails {
        AppErrorWithDetails {
            error: self,
            details: Some(details),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        AppErrorWithDetails::from(self).into_response()
    }
}

pub struct AppErrorWithDetails {
    error: AppError,
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppErrorWithDetails {
    fn into_response(self) -> Response {
        let (status, code, message) = self.error.parts();

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details: self.details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<AppError> for AppErrorWithDetails {
    fn from(error: AppError) -> Self {
        AppErrorWithDetails {
            error,
            details: None,
        }
    }
}

impl From<QueueError> for AppErrorWithDetails {
    fn from(error: QueueError) -> Self {
        AppError::Queue(error).into()
    }
}

pub type AppResult<T> = Result<T, AppError>;
