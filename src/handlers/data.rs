use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::event::EventFilter;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    1000
}

/// Query historical events; thin proxy over the event store.
pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.limit == 0 || query.limit > 50_000 {
        return Err(ApiError::bad_request("limit must be between 1 and 50000"));
    }
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - chrono::Duration::days(1));
    if from >= to {
        return Err(ApiError::bad_request("'from' must be earlier than 'to'"));
    }

    let filter = EventFilter {
        entity_id: query.entity_id,
        device_id: query.device_id,
        domain: query.domain,
    };
    let events = state
        .events
        .fetch_events(from, to, &filter, query.limit)
        .await?;
    Ok(Json(json!({
        "count": events.len(),
        "from": from.to_rfc3339(),
        "to": to.to_rfc3339(),
        "events": events,
    })))
}

/// Registry proxy: the device list.
pub async fn devices(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let devices = state.registry.get_devices().await?;
    Ok(Json(json!({ "count": devices.len(), "devices": devices })))
}

/// Registry proxy: every entity across all devices.
pub async fn entities(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let devices = state.registry.get_devices().await?;
    let entities: Vec<Value> = devices
        .iter()
        .flat_map(|d| {
            d.entities.iter().map(|e| {
                json!({
                    "entity_id": e.entity_id,
                    "friendly_name": e.friendly_name,
                    "device_id": d.device_id,
                    "area_id": d.area_id,
                })
            })
        })
        .collect();
    Ok(Json(json!({ "count": entities.len(), "entities": entities })))
}
