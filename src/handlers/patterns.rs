use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::detectors::time_of_day::TimeOfDayDetector;
use crate::error::ApiError;
use crate::models::event::EventFilter;
use crate::models::pattern::PatternSummary;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DetectQuery {
    #[serde(default = "default_days")]
    pub days: i64,
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: u32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_detect_limit")]
    pub limit: usize,
}

fn default_days() -> i64 {
    30
}

fn default_min_occurrences() -> u32 {
    5
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_detect_limit() -> usize {
    10_000
}

/// Run the time-of-day detector on demand over fresh event history.
pub async fn detect_time_of_day(
    State(state): State<AppState>,
    Query(query): Query<DetectQuery>,
) -> Result<Json<Value>, ApiError> {
    if !(1..=90).contains(&query.days) {
        return Err(ApiError::bad_request("days must be between 1 and 90"));
    }
    if !(0.0..=1.0).contains(&query.min_confidence) {
        return Err(ApiError::bad_request(
            "min_confidence must be between 0.0 and 1.0",
        ));
    }

    let to = Utc::now();
    let from = to - chrono::Duration::days(query.days);
    let events = state
        .events
        .fetch_events(from, to, &EventFilter::default(), query.limit)
        .await?;
    if events.is_empty() {
        return Ok(Json(json!({
            "success": false,
            "message": format!("no events found for the last {} days", query.days),
            "data": { "patterns_detected": 0, "patterns_stored": 0, "events_analyzed": 0 },
        })));
    }

    let detector = TimeOfDayDetector::new(query.min_occurrences, query.min_confidence);
    let patterns = detector.detect(&events);
    let stored = state.store.upsert_patterns(&patterns)?;

    // Aggregate emission is best-effort; pattern storage already succeeded.
    let aggregates = detector.daily_aggregates(&events, &patterns);
    if let Err(e) = state.store.upsert_time_of_day_daily(&aggregates) {
        tracing::warn!("aggregate write failed: {e}");
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("detected and stored {stored} time-of-day patterns"),
        "data": {
            "patterns_detected": patterns.len(),
            "patterns_stored": stored,
            "events_analyzed": events.len(),
            "summary": PatternSummary::from_patterns(&patterns),
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub pattern_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
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
    if let Some(t) = &query.pattern_type {
        if t != "time_of_day" && t != "co_occurrence" {
            return Err(ApiError::bad_request(format!("unknown pattern_type: {t}")));
        }
    }
    let patterns = state.store.list_patterns(
        query.pattern_type.as_deref(),
        query.entity_id.as_deref(),
        query.min_confidence,
        query.limit.min(1000),
    )?;
    Ok(Json(json!({ "count": patterns.len(), "patterns": patterns })))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let patterns = state.store.list_patterns(None, None, None, usize::MAX)?;
    let by_type = |t: &str| patterns.iter().filter(|p| p.pattern_type() == t).count();
    Ok(Json(json!({
        "total": patterns.len(),
        "time_of_day": by_type("time_of_day"),
        "co_occurrence": by_type("co_occurrence"),
        "summary": PatternSummary::from_patterns(&patterns),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_cleanup_days")]
    pub days: i64,
}

fn default_cleanup_days() -> i64 {
    30
}

/// Delete patterns older than the threshold.
pub async fn cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.days < 1 {
        return Err(ApiError::bad_request("days must be at least 1"));
    }
    let deleted = state.store.cleanup_patterns(query.days)?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}
