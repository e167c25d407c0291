use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::pipeline::PipelineError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TriggerQuery {
    /// Caller-supplied wall-clock cap in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Manual pipeline trigger; the run proceeds in the background.
pub async fn analyze_and_suggest(
    State(state): State<AppState>,
    Query(query): Query<TriggerQuery>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Some(t) = query.timeout {
        if t == 0 || t > 3600 {
            return Err(ApiError::bad_request("timeout must be between 1 and 3600"));
        }
    }
    match state
        .scheduler
        .trigger(query.timeout.map(Duration::from_secs))
    {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "message": "running_in_background",
            })),
        )),
        Err(PipelineError::AlreadyRunning) => Err(ApiError::conflict("already_running")),
    }
}

pub async fn trigger(
    state: State<AppState>,
    query: Query<TriggerQuery>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    analyze_and_suggest(state, query).await
}

pub async fn schedule(State(state): State<AppState>) -> Json<Value> {
    let status = state.scheduler.status(0);
    Json(json!({
        "schedule": status.schedule,
        "next_run": status.next_run,
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.scheduler.status(10)).unwrap_or_else(|_| json!({})))
}

/// Request cancellation at the next suspension point; in-flight LLM calls
/// complete and partial results stay persisted.
pub async fn stop(State(state): State<AppState>) -> Json<Value> {
    state.scheduler.stop();
    Json(json!({ "success": true, "message": "stop requested" }))
}
