use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::device::DeviceRecord;
use crate::models::suggestion::{
    BatchStatusRequest, Feedback, FeedbackAction, StatusChangeRequest, Suggestion,
    SuggestionStatus, UpdateSuggestionRequest,
};
use crate::suggestion_generator::DeviceContextIndex;
use crate::AppState;

/// Registry snapshot plus the enriched per-entity context the generator and
/// validator need. Shared by the suggestion and deploy handlers.
pub(crate) async fn build_context(
    state: &AppState,
) -> Result<(Vec<DeviceRecord>, DeviceContextIndex), ApiError> {
    let devices = state.registry.get_devices().await?;
    let area_names: BTreeMap<String, String> = match state.registry.get_areas().await {
        Ok(areas) => areas.into_iter().map(|a| (a.area_id, a.name)).collect(),
        Err(e) => {
            tracing::warn!("area listing unavailable: {e}");
            BTreeMap::new()
        }
    };
    let capability_index = state
        .store
        .list_capabilities()?
        .into_iter()
        .map(|r| (r.device_model.clone(), r))
        .collect();
    let context = DeviceContextIndex::build(&devices, &area_names, &capability_index);
    Ok((devices, context))
}

fn record_feedback(
    state: &AppState,
    suggestion_id: &str,
    action: FeedbackAction,
    free_text: Option<String>,
) {
    let feedback = Feedback {
        id: uuid::Uuid::new_v4().to_string(),
        suggestion_id: suggestion_id.to_string(),
        action,
        free_text,
        created_at: Utc::now(),
    };
    if let Err(e) = state.store.insert_feedback(&feedback) {
        tracing::warn!("failed to record feedback for {suggestion_id}: {e}");
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            max_patterns: default_max_patterns(),
        }
    }
}

fn default_max_patterns() -> usize {
    10
}

/// Produce suggestions from the patterns already in the store.
pub async fn generate(
    State(state): State<AppState>,
    body: Option<Json<GenerateRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let patterns = state
        .store
        .list_patterns(None, None, None, request.max_patterns.clamp(1, 50))?;
    if patterns.is_empty() {
        return Ok(Json(json!({
            "success": false,
            "message": "no stored patterns to generate from",
            "suggestions": [],
        })));
    }

    let (_devices, context) = build_context(&state).await?;
    let outcome = state
        .generator
        .generate_suggestions(&patterns, &[], &[], &context, &[])
        .await;

    for suggestion in &outcome.suggestions {
        state.store.insert_suggestion(suggestion)?;
    }

    Ok(Json(json!({
        "success": true,
        "generated": outcome.suggestions.len(),
        "errors": outcome.errors,
        "suggestions": outcome.suggestions,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    100
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = match &query.status {
        Some(raw) => Some(
            SuggestionStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };
    let suggestions = state.store.list_suggestions(status, query.limit.min(1000))?;
    Ok(Json(json!({ "count": suggestions.len(), "suggestions": suggestions })))
}

fn get_or_404(state: &AppState, id: &str) -> Result<Suggestion, ApiError> {
    state
        .store
        .get_suggestion(id)?
        .ok_or_else(|| ApiError::not_found(format!("suggestion {id} not found")))
}

/// Approve a suggestion and materialise its automation specification. The
/// LLM is asked for the automation document first; the status only moves
/// once that worked.
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StatusChangeRequest>>,
) -> Result<Json<Value>, ApiError> {
    let suggestion = get_or_404(&state, &id)?;
    if !suggestion.status.can_transition(SuggestionStatus::Approved) {
        return Err(ApiError::conflict(format!(
            "cannot approve a {} suggestion",
            suggestion.status.as_str()
        )));
    }

    let (_devices, context) = build_context(&state).await?;
    let validated_contexts = context.lookup(&suggestion.validated_entities);
    let spec = state
        .generator
        .generate_automation(&suggestion, &validated_contexts)
        .await
        .map_err(ApiError::unavailable)?;

    let validated_ids: Vec<String> = validated_contexts
        .iter()
        .map(|c| c.entity_id.clone())
        .collect();
    let validated_ids = if validated_ids.is_empty() {
        suggestion.validated_entities.clone()
    } else {
        validated_ids
    };
    state.store.set_automation_spec(&id, &spec, &validated_ids)?;
    state
        .store
        .update_suggestion_status(&id, SuggestionStatus::Approved)?;
    record_feedback(
        &state,
        &id,
        FeedbackAction::Approved,
        body.and_then(|Json(r)| r.free_text),
    );

    let updated = get_or_404(&state, &id)?;
    Ok(Json(json!({ "success": true, "suggestion": updated })))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StatusChangeRequest>>,
) -> Result<Json<Value>, ApiError> {
    let suggestion = get_or_404(&state, &id)?;
    if !suggestion.status.can_transition(SuggestionStatus::Rejected) {
        return Err(ApiError::conflict(format!(
            "cannot reject a {} suggestion",
            suggestion.status.as_str()
        )));
    }
    state
        .store
        .update_suggestion_status(&id, SuggestionStatus::Rejected)?;
    record_feedback(
        &state,
        &id,
        FeedbackAction::Rejected,
        body.and_then(|Json(r)| r.free_text),
    );
    let updated = get_or_404(&state, &id)?;
    Ok(Json(json!({ "success": true, "suggestion": updated })))
}

/// Edit a suggestion's text or specification; recorded as `modified`.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edit): Json<UpdateSuggestionRequest>,
) -> Result<Json<Value>, ApiError> {
    if edit.is_empty() {
        return Err(ApiError::bad_request("no fields to update"));
    }
    let suggestion = get_or_404(&state, &id)?;
    if suggestion.status == SuggestionStatus::Deployed {
        return Err(ApiError::conflict("deployed suggestions cannot be edited"));
    }
    state.store.apply_suggestion_edit(&id, &edit)?;
    record_feedback(&state, &id, FeedbackAction::Modified, None);
    let updated = get_or_404(&state, &id)?;
    Ok(Json(json!({ "success": true, "suggestion": updated })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete_suggestion(&id)? {
        return Err(ApiError::not_found(format!("suggestion {id} not found")));
    }
    Ok(Json(json!({ "success": true })))
}

/// Bulk status transition. Unlike the single-suggestion approve, the batch
/// form only moves status; specifications are materialised at deploy time.
pub async fn batch_approve(
    State(state): State<AppState>,
    Json(request): Json<BatchStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    batch_transition(state, request, SuggestionStatus::Approved, FeedbackAction::Approved)
}

pub async fn batch_reject(
    State(state): State<AppState>,
    Json(request): Json<BatchStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    batch_transition(state, request, SuggestionStatus::Rejected, FeedbackAction::Rejected)
}

fn batch_transition(
    state: AppState,
    request: BatchStatusRequest,
    target: SuggestionStatus,
    action: FeedbackAction,
) -> Result<Json<Value>, ApiError> {
    if request.ids.is_empty() {
        return Err(ApiError::bad_request("ids must not be empty"));
    }
    let mut updated = 0;
    let mut skipped = Vec::new();
    for id in &request.ids {
        match state.store.get_suggestion(id)? {
            Some(s) if s.status.can_transition(target) => {
                state.store.update_suggestion_status(id, target)?;
                record_feedback(&state, id, action, request.free_text.clone());
                updated += 1;
            }
            Some(s) => skipped.push(json!({ "id": id, "status": s.status })),
            None => skipped.push(json!({ "id": id, "status": "missing" })),
        }
    }
    Ok(Json(json!({
        "success": true,
        "updated": updated,
        "skipped": skipped,
    })))
}
