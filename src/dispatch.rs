use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::EngineError,
    metrics::MetricsRegistry,
    models::{ExecutionResult, Job, JobState, Language, Outcome, now_ms},
    queue::QueueBackend,
    store::{JobRecord, JobStore},
};

const MAX_SOURCE_BYTES: usize = 256_000;

/// Submission and polling surface over the queue. External collaborators
/// (HTTP front end, CLI) only ever talk to this.
pub struct Dispatcher {
    queue: Arc<dyn QueueBackend>,
    store: JobStore,
    metrics: Arc<MetricsRegistry>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        store: JobStore,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            queue,
            store,
            metrics,
        }
    }

    pub async fn submit(&self, language: Language, source: String) -> Result<Uuid, EngineError> {
        validate_source(&source)?;
        let id = Uuid::new_v4();
        self.store.insert(id, language);
        let job = Job {
            id,
            language,
            source,
            submitted_at_ms: now_ms(),
            deliveries: 0,
        };
        if let Err(err) = self.queue.enqueue(job).await {
            self.store.remove(&id);
            return Err(err.into());
        }
        self.metrics.submitted(language);
        tracing::info!(job_id = %id, language = language.as_str(), "job accepted");
        Ok(id)
    }

    /// The published result if the job has one, otherwise its current state.
    pub async fn result(&self, id: Uuid) -> Result<ResultResponse, EngineError> {
        if let Some(result) = self.queue.fetch_result(id).await? {
            let state = match result.outcome {
                Outcome::Success { .. } => JobState::Completed,
                Outcome::Failure { .. } => JobState::Failed,
            };
            return Ok(ResultResponse {
                id,
                state,
                result: Some(result),
            });
        }
        let record = self.store.get(&id).ok_or(EngineError::NotFound)?;
        Ok(ResultResponse {
            id,
            state: record.state,
            result: None,
        })
    }

    pub fn status(&self, id: Uuid) -> Result<JobRecord, EngineError> {
        self.store.get(&id).ok_or(EngineError::NotFound)
    }
}

fn validate_source(source: &str) -> Result<(), EngineError> {
    if source.trim().is_empty() {
        return Err(EngineError::InvalidRequest("source is empty".to_string()));
    }
    if source.len() > MAX_SOURCE_BYTES {
        return Err(EngineError::InvalidRequest("source too large".to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub language: Language,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub state: JobState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultResponse {
    pub id: Uuid,
    pub state: JobState,
    pub result: Option<ExecutionResult>,
}

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsRegistry>,
}

pub fn routes(dispatcher: Arc<Dispatcher>, metrics: Arc<MetricsRegistry>) -> Router {
    let state = AppState {
        dispatcher,
        metrics,
    };
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(render_metrics))
        .route("/v1/jobs", post(submit_job))
        .route("/v1/jobs/{id}", get(job_status))
        .route("/v1/jobs/{id}/result", get(job_result))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn render_metrics(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render_prometheus())
}

async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), EngineError> {
    let id = state
        .dispatcher
        .submit(request.language, request.source)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            id,
            state: JobState::Pending,
        }),
    ))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobRecord>, EngineError> {
    Ok(Json(state.dispatcher.status(id)?))
}

async fn job_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResultResponse>, EngineError> {
    Ok(Json(state.dispatcher.result(id).await?))
}

#[cfg(test)]
mod tests {
    use super::validate_source;

    #[test]
    fn rejects_empty_and_oversized_source() {
        assert!(validate_source("   \n").is_err());
        assert!(validate_source(&"x".repeat(300_000)).is_err());
        assert!(validate_source("print(1)").is_ok());
    }
}
