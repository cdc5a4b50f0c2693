use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Broker-level failures. These never describe what submitted code did;
/// classified execution failures travel inside `ExecutionResult`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue for language is at capacity")]
    Full,
    #[error("result already published for job {0}")]
    DuplicateResult(Uuid),
    #[error("queue payload corrupt: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("broker error: {0}")]
    Broker(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(value: redis::RedisError) -> Self {
        Self::Broker(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("queue is full")]
    QueueFull,
    #[error("job not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<QueueError> for EngineError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::Full => Self::QueueFull,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match self {
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}
