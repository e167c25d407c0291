use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::store::Table;
use crate::AppState;

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "ha-insight",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Mines smart-home event history into automation suggestions",
    }))
}

/// Liveness plus store and capability-cache statistics, and a probe of each
/// remote collaborator.
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let now = Utc::now();
    let (capability_total, capability_stale) = state.store.capability_stats(now)?;

    let (event_store, registry, orchestrator) = tokio::join!(
        state.events.health(),
        state.registry.health(),
        state.orchestrator.health(),
    );

    Ok(Json(json!({
        "status": "healthy",
        "service": "ha-insight",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": now.to_rfc3339(),
        "pipeline_running": state.pipeline.is_running(),
        "store": {
            "patterns": state.store.count(Table::Patterns)?,
            "suggestions": state.store.count(Table::Suggestions)?,
            "synergies": state.store.count(Table::Synergies)?,
            "feedback": state.store.count(Table::Feedback)?,
        },
        "capabilities": {
            "total": capability_total,
            "stale": capability_stale,
        },
        "remotes": {
            "event_store": event_store,
            "registry": registry,
            "orchestrator": orchestrator,
        },
        "llm_usage": state.usage.snapshot(),
    })))
}
