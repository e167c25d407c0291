use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::synergy::SynergyStats;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let synergies = state.store.list_synergies(query.limit.min(1000))?;
    Ok(Json(json!({ "count": synergies.len(), "synergies": synergies })))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let synergies = state.store.list_synergies(usize::MAX)?;
    Ok(Json(serde_json::to_value(SynergyStats::from_synergies(&synergies)).unwrap_or_default()))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let synergy = state
        .store
        .get_synergy(&id)?
        .ok_or_else(|| ApiError::not_found(format!("synergy {id} not found")))?;
    Ok(Json(json!({ "synergy": synergy })))
}
