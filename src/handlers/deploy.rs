use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::suggestion::SuggestionStatus;
use crate::safety_validator::SafetyValidator;
use crate::AppState;

use super::suggestions::build_context;

#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    /// Deploy despite critical findings. Only honoured when the
    /// configuration allows overrides.
    #[serde(default)]
    pub r#override: bool,
}

/// Materialise an approved suggestion and push it to the orchestrator,
/// gated by the safety validator.
pub async fn deploy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DeployQuery>,
) -> Result<Json<Value>, ApiError> {
    let suggestion = state
        .store
        .get_suggestion(&id)?
        .ok_or_else(|| ApiError::not_found(format!("suggestion {id} not found")))?;
    if suggestion.status != SuggestionStatus::Approved {
        return Err(ApiError::conflict(format!(
            "only approved suggestions can be deployed, this one is {}",
            suggestion.status.as_str()
        )));
    }

    let (devices, context) = build_context(&state).await?;

    // Batch-approved suggestions arrive here without a materialised spec.
    let spec = match &suggestion.automation_spec {
        Some(spec) => spec.clone(),
        None => {
            let validated_contexts = context.lookup(&suggestion.validated_entities);
            let spec = state
                .generator
                .generate_automation(&suggestion, &validated_contexts)
                .await
                .map_err(ApiError::unavailable)?;
            state
                .store
                .set_automation_spec(&id, &spec, &suggestion.validated_entities)?;
            spec
        }
    };

    let known_entities: BTreeSet<String> = devices
        .iter()
        .flat_map(|d| d.entities.iter().map(|e| e.entity_id.clone()))
        .collect();
    let automations = match state.orchestrator.list_automations().await {
        Ok(automations) => automations,
        Err(e) => {
            tracing::warn!("automation listing unavailable, conflict check skipped: {e}");
            Vec::new()
        }
    };

    let validator = SafetyValidator::new(state.config.safety_level);
    let report = validator.validate(
        &spec,
        &suggestion.validated_entities,
        &known_entities,
        &automations,
    );

    let blocked = !report.safe || report.score < state.config.safety_min_score;
    if blocked && !(query.r#override && state.config.safety_allow_override) {
        return Ok(Json(json!({
            "success": false,
            "message": "deployment blocked by safety validation",
            "report": report,
        })));
    }
    if blocked {
        tracing::warn!("deploying {id} with override despite safety findings");
    }

    state.orchestrator.deploy_automation(&id, &spec).await?;
    state
        .store
        .update_suggestion_status(&id, SuggestionStatus::Deployed)?;

    Ok(Json(json!({
        "success": true,
        "automation_id": id,
        "report": report,
    })))
}
