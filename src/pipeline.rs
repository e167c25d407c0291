use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::capability_parser::CapabilityParser;
use crate::clients::community::{CommunityAutomation, CommunityClient};
use crate::clients::event_store::EventStoreClient;
use crate::clients::orchestrator::OrchestratorClient;
use crate::clients::publisher::{
    NotificationPublisher, TOPIC_ANALYSIS_COMPLETE, TOPIC_SUGGESTIONS_NEW,
};
use crate::clients::registry::DeviceRegistryClient;
use crate::detectors::co_occurrence::CoOccurrenceDetector;
use crate::detectors::time_of_day::TimeOfDayDetector;
use crate::feature_analyzer::FeatureAnalyzer;
use crate::models::automation::AutomationRule;
use crate::models::capability::{CapabilityRecord, CapabilitySource};
use crate::models::event::{Event, EventFilter};
use crate::store::SuggestionStore;
use crate::suggestion_generator::{DeviceContextIndex, SuggestionGenerator};
use crate::synergy_detector::SynergyDetector;
use crate::usage_tracker::UsageTracker;

const EVENT_FETCH_LIMIT: usize = 100_000;
const JOB_HISTORY_LIMIT: usize = 30;
/// A phase slower than this multiple of its historical median gets flagged.
const SLOW_PHASE_FACTOR: f64 = 3.0;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("already_running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    NoData,
    Failed,
    Cancelled,
}

/// One pipeline run's outcome, kept in the bounded in-memory job history.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: String,
    pub duration_seconds: f64,
    pub events_count: usize,
    pub devices_checked: usize,
    pub capabilities_refreshed: usize,
    pub patterns_detected: usize,
    pub patterns_stored: usize,
    pub opportunities_found: usize,
    pub synergies_detected: usize,
    pub synergies_stored: usize,
    pub suggestions_generated: usize,
    pub suggestion_errors: usize,
    pub llm_calls: u64,
    pub llm_input_tokens: u64,
    pub llm_output_tokens: u64,
    pub llm_cost_usd: f64,
    pub phase_timings: BTreeMap<String, f64>,
    pub error: Option<String>,
}

impl JobRecord {
    fn started_now() -> Self {
        Self {
            status: RunStatus::Failed,
            started_at: Utc::now().to_rfc3339(),
            finished_at: String::new(),
            duration_seconds: 0.0,
            events_count: 0,
            devices_checked: 0,
            capabilities_refreshed: 0,
            patterns_detected: 0,
            patterns_stored: 0,
            opportunities_found: 0,
            synergies_detected: 0,
            synergies_stored: 0,
            suggestions_generated: 0,
            suggestion_errors: 0,
            llm_calls: 0,
            llm_input_tokens: 0,
            llm_output_tokens: 0,
            llm_cost_usd: 0.0,
            phase_timings: BTreeMap::new(),
            error: None,
        }
    }
}

pub struct PipelineDeps {
    pub store: Arc<SuggestionStore>,
    pub events: Arc<EventStoreClient>,
    pub registry: Arc<DeviceRegistryClient>,
    pub orchestrator: Arc<OrchestratorClient>,
    pub generator: Arc<SuggestionGenerator>,
    pub usage: Arc<UsageTracker>,
    pub publisher: Arc<NotificationPublisher>,
    pub community: Option<Arc<CommunityClient>>,
}

/// The six-phase scheduled job. At most one run at a time; a trigger while
/// a run is active is rejected with `already_running`.
pub struct PipelineOrchestrator {
    deps: PipelineDeps,
    analysis_days: i64,
    running: AtomicBool,
    history: Mutex<VecDeque<JobRecord>>,
    phase_history: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl PipelineOrchestrator {
    pub fn new(deps: PipelineDeps, analysis_days: i64) -> Self {
        Self {
            deps,
            analysis_days,
            running: AtomicBool::new(false),
            history: Mutex::new(VecDeque::new()),
            phase_history: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn history(&self, limit: usize) -> Vec<JobRecord> {
        let history = self.history.lock().unwrap();
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Run to completion on the caller's task. Fails fast when a run is
    /// already active.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<JobRecord, PipelineError> {
        self.reserve()?;
        Ok(self.run_reserved(cancel, timeout).await)
    }

    /// Reserve the runner slot and execute in the background.
    pub fn spawn_run(
        self: &Arc<Self>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<(), PipelineError> {
        self.reserve()?;
        let this = self.clone();
        tokio::spawn(async move {
            this.run_reserved(cancel, timeout).await;
        });
        Ok(())
    }

    fn reserve(&self) -> Result<(), PipelineError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| PipelineError::AlreadyRunning)
    }

    async fn run_reserved(&self, cancel: CancellationToken, timeout: Duration) -> JobRecord {
        let started = std::time::Instant::now();
        let mut record = JobRecord::started_now();
        tracing::info!("daily analysis started (window {} days)", self.analysis_days);

        match tokio::time::timeout(timeout, self.run_phases(&cancel, &mut record)).await {
            Ok(()) => {}
            Err(_) => {
                record.status = RunStatus::Failed;
                record.error =
                    Some(format!("pipeline exceeded {}s wall clock", timeout.as_secs()));
                tracing::error!("pipeline timed out after {timeout:?}");
            }
        }

        record.finished_at = Utc::now().to_rfc3339();
        record.duration_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            "daily analysis finished: {:?} in {:.1}s ({} patterns, {} suggestions, {} llm calls)",
            record.status,
            record.duration_seconds,
            record.patterns_detected,
            record.suggestions_generated,
            record.llm_calls,
        );

        {
            let mut history = self.history.lock().unwrap();
            history.push_back(record.clone());
            while history.len() > JOB_HISTORY_LIMIT {
                history.pop_front();
            }
        }
        self.running.store(false, Ordering::SeqCst);
        record
    }

    async fn run_phases(&self, cancel: &CancellationToken, record: &mut JobRecord) {
        // ── Phase 1: capability refresh (never aborts the run) ──
        let phase_start = std::time::Instant::now();
        let devices = match self.deps.registry.get_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("capability refresh: registry unavailable, continuing: {e}");
                Vec::new()
            }
        };
        record.devices_checked = devices.len();
        record.capabilities_refreshed = self.refresh_capabilities(&devices).await;
        self.note_phase("capability_refresh", phase_start.elapsed(), record);
        if cancel.is_cancelled() {
            record.status = RunStatus::Cancelled;
            return;
        }

        // ── Phase 2: event fetch (failure aborts) ──
        let phase_start = std::time::Instant::now();
        let to = Utc::now();
        let from = to - chrono::Duration::days(self.analysis_days);
        let events = match self
            .deps
            .events
            .fetch_events(from, to, &EventFilter::default(), EVENT_FETCH_LIMIT)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                record.status = RunStatus::Failed;
                record.error = Some(format!("event fetch failed: {e}"));
                return;
            }
        };
        record.events_count = events.len();
        self.note_phase("event_fetch", phase_start.elapsed(), record);
        if events.is_empty() {
            tracing::warn!("no events available for analysis");
            record.status = RunStatus::NoData;
            return;
        }
        if cancel.is_cancelled() {
            record.status = RunStatus::Cancelled;
            return;
        }

        // ── Phase 3: pattern detection, both detectors concurrently ──
        let phase_start = std::time::Instant::now();
        let shared_events: Arc<Vec<Event>> = Arc::new(events);
        let tod_events = shared_events.clone();
        let tod_task = tokio::task::spawn_blocking(move || {
            let detector = TimeOfDayDetector::default();
            let patterns = detector.detect(&tod_events);
            let aggregates = detector.daily_aggregates(&tod_events, &patterns);
            (patterns, aggregates)
        });
        let co_events = shared_events.clone();
        let co_task = tokio::task::spawn_blocking(move || {
            let detector = CoOccurrenceDetector::default();
            let patterns = detector.detect(&co_events);
            let aggregates = detector.daily_aggregates(&co_events, &patterns);
            (patterns, aggregates)
        });

        let (tod, co) = match tokio::try_join!(tod_task, co_task) {
            Ok(results) => results,
            Err(e) => {
                record.status = RunStatus::Failed;
                record.error = Some(format!("pattern detection panicked: {e}"));
                return;
            }
        };
        let (tod_patterns, tod_aggregates) = tod;
        let (co_patterns, co_aggregates) = co;

        let mut patterns = tod_patterns;
        patterns.extend(co_patterns);
        record.patterns_detected = patterns.len();

        match self.deps.store.upsert_patterns(&patterns) {
            Ok(stored) => record.patterns_stored = stored,
            Err(e) => tracing::error!("failed to store patterns: {e}"),
        }
        // Aggregate writes are best-effort: pattern emission must not depend
        // on them.
        if let Err(e) = self.deps.store.upsert_time_of_day_daily(&tod_aggregates) {
            tracing::warn!("time-of-day aggregate write failed: {e}");
        }
        if let Err(e) = self.deps.store.upsert_co_occurrence_daily(&co_aggregates) {
            tracing::warn!("co-occurrence aggregate write failed: {e}");
        }
        self.note_phase("pattern_detection", phase_start.elapsed(), record);
        if cancel.is_cancelled() {
            record.status = RunStatus::Cancelled;
            return;
        }

        // ── Phase 4: feature + synergy analysis (optional, degrades) ──
        let phase_start = std::time::Instant::now();
        let automations = match self.deps.orchestrator.list_automations().await {
            Ok(automations) => automations,
            Err(e) => {
                tracing::warn!("automation listing unavailable, synergies unfiltered: {e}");
                Vec::new()
            }
        };
        let capability_index: BTreeMap<String, CapabilityRecord> = self
            .deps
            .store
            .list_capabilities()
            .unwrap_or_default()
            .into_iter()
            .map(|r| (r.device_model.clone(), r))
            .collect();

        let report = FeatureAnalyzer.analyze(&devices, &capability_index);
        record.opportunities_found = report.opportunities.len();

        let synergies = self.detect_synergies(&devices, &shared_events, &automations);
        record.synergies_detected = synergies.len();
        match self.deps.store.upsert_synergies(&synergies) {
            Ok(stored) => record.synergies_stored = stored,
            Err(e) => tracing::warn!("failed to store synergies: {e}"),
        }
        self.note_phase("feature_synergy_analysis", phase_start.elapsed(), record);
        if cancel.is_cancelled() {
            record.status = RunStatus::Cancelled;
            return;
        }

        // ── Phase 5: suggestion generation (persistence failure aborts) ──
        let phase_start = std::time::Instant::now();
        let enhancements = self.community_enhancements(&patterns).await;
        let area_names = match self.deps.registry.get_areas().await {
            Ok(areas) => areas.into_iter().map(|a| (a.area_id, a.name)).collect(),
            Err(e) => {
                tracing::warn!("area listing unavailable: {e}");
                BTreeMap::new()
            }
        };
        let context = DeviceContextIndex::build(&devices, &area_names, &capability_index);

        let usage_before = self.deps.usage.snapshot();
        let outcome = self
            .deps
            .generator
            .generate_suggestions(
                &patterns,
                &report.opportunities,
                &synergies,
                &context,
                &enhancements,
            )
            .await;
        record.suggestion_errors = outcome.errors.len();

        for suggestion in &outcome.suggestions {
            if let Err(e) = self.deps.store.insert_suggestion(suggestion) {
                record.status = RunStatus::Failed;
                record.error = Some(format!("suggestion persistence failed: {e}"));
                return;
            }
            record.suggestions_generated += 1;
        }

        let usage = self.deps.usage.snapshot().since(&usage_before);
        record.llm_calls = usage.calls;
        record.llm_input_tokens = usage.input_tokens;
        record.llm_output_tokens = usage.output_tokens;
        record.llm_cost_usd = usage.est_cost_usd;
        if let Err(e) = self
            .deps
            .store
            .add_llm_usage(&usage.as_day(Utc::now().date_naive()))
        {
            tracing::warn!("failed to persist llm usage totals: {e}");
        }
        self.note_phase("suggestion_generation", phase_start.elapsed(), record);

        if cancel.is_cancelled() {
            record.status = RunStatus::Cancelled;
            return;
        }

        // ── Phase 6: notify & record ──
        let phase_start = std::time::Instant::now();
        if !outcome.suggestions.is_empty() {
            self.deps
                .publisher
                .publish(
                    TOPIC_SUGGESTIONS_NEW,
                    serde_json::json!({
                        "timestamp": Utc::now().to_rfc3339(),
                        "success": true,
                        "suggestions": record.suggestions_generated,
                    }),
                )
                .await;
        }
        self.deps
            .publisher
            .publish(
                TOPIC_ANALYSIS_COMPLETE,
                serde_json::json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "success": true,
                    "events_analyzed": record.events_count,
                    "patterns_detected": record.patterns_detected,
                    "opportunities_found": record.opportunities_found,
                    "synergies_detected": record.synergies_detected,
                    "suggestions_generated": record.suggestions_generated,
                    "llm_tokens": record.llm_input_tokens + record.llm_output_tokens,
                    "llm_cost_usd": record.llm_cost_usd,
                }),
            )
            .await;
        self.note_phase("notify", phase_start.elapsed(), record);

        record.status = RunStatus::Success;
    }

    /// Upsert capability records for models that are missing or stale.
    async fn refresh_capabilities(&self, devices: &[crate::models::device::DeviceRecord]) -> usize {
        let now = Utc::now();
        let mut refreshed = 0;
        let mut seen_models = BTreeSet::new();
        for device in devices {
            if device.model.is_empty() || !seen_models.insert(device.model.clone()) {
                continue;
            }
            let fresh = matches!(
                self.deps.store.get_capability(&device.model),
                Ok(Some(record)) if !record.is_stale(now)
            );
            if fresh {
                continue;
            }
            match self.deps.registry.get_exposes(&device.device_id).await {
                Ok(Some(payload)) => {
                    let record = CapabilityParser.parse_record(
                        &device.model,
                        if payload.manufacturer.is_empty() {
                            &device.manufacturer
                        } else {
                            &payload.manufacturer
                        },
                        &payload.description,
                        &payload.exposes,
                        CapabilitySource::Bridge,
                        now,
                    );
                    match self.deps.store.upsert_capability(&record) {
                        Ok(()) => refreshed += 1,
                        Err(e) => tracing::warn!("capability upsert for {} failed: {e}", device.model),
                    }
                }
                Ok(None) => {
                    tracing::debug!("no exposes for {} ({})", device.device_id, device.model);
                }
                Err(e) => {
                    tracing::warn!("exposes fetch for {} failed: {e}", device.device_id);
                }
            }
        }
        refreshed
    }

    fn detect_synergies(
        &self,
        devices: &[crate::models::device::DeviceRecord],
        events: &[Event],
        automations: &[AutomationRule],
    ) -> Vec<crate::models::synergy::SynergyOpportunity> {
        let detector = SynergyDetector::default();
        let mut synergies = detector.detect_device_pairs(devices, automations);
        synergies.extend(detector.detect_context_opportunities(events, automations));
        synergies
    }

    /// Optional community enhancement: search the corpus for the domains the
    /// detected patterns talk about. Absent or failing, returns nothing.
    async fn community_enhancements(
        &self,
        patterns: &[crate::models::pattern::Pattern],
    ) -> Vec<CommunityAutomation> {
        let Some(community) = &self.deps.community else {
            return Vec::new();
        };
        if patterns.is_empty() {
            return Vec::new();
        }

        let mut domains = BTreeSet::new();
        for pattern in patterns {
            for entity in pattern.entities() {
                domains.insert(entity.split('.').next().unwrap_or("").to_string());
            }
        }

        let mut enhancements = Vec::new();
        for domain in domains.into_iter().take(5) {
            match community.search(&domain, 0.8, 5).await {
                Ok(results) => enhancements.extend(results),
                Err(e) => {
                    tracing::warn!("community enhancement for '{domain}' failed, degrading: {e}");
                }
            }
        }
        enhancements
    }

    fn note_phase(&self, name: &str, elapsed: Duration, record: &mut JobRecord) {
        let secs = elapsed.as_secs_f64();
        record.phase_timings.insert(name.to_string(), secs);

        let mut history = self.phase_history.lock().unwrap();
        let durations = history.entry(name.to_string()).or_default();
        if durations.len() >= 3 {
            let mut sorted = durations.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median = sorted[sorted.len() / 2];
            if median > 0.0 && secs > median * SLOW_PHASE_FACTOR {
                tracing::warn!(
                    "slow_phase: {name} took {secs:.2}s, median is {median:.2}s"
                );
            }
        }
        durations.push(secs);
        if durations.len() > 100 {
            durations.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::llm::ScriptedChatModel;
    use crate::models::suggestion::SuggestionStatus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        pipeline: Arc<PipelineOrchestrator>,
        store: Arc<SuggestionStore>,
        _dir: tempfile::TempDir,
    }

    async fn harness(
        event_server: &MockServer,
        registry_server: &MockServer,
        orchestrator_server: &MockServer,
        llm_replies: Vec<Result<String, crate::error::ClientError>>,
    ) -> Harness {
        harness_with_model(
            event_server,
            registry_server,
            orchestrator_server,
            Arc::new(ScriptedChatModel::new(llm_replies)),
        )
        .await
    }

    async fn harness_with_model(
        event_server: &MockServer,
        registry_server: &MockServer,
        orchestrator_server: &MockServer,
        model: Arc<ScriptedChatModel>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SuggestionStore::open(dir.path().join("test.db").to_str().unwrap()).unwrap(),
        );
        let usage = Arc::new(UsageTracker::default());
        let generator = Arc::new(SuggestionGenerator::new(model, usage.clone(), 2));
        let deps = PipelineDeps {
            store: store.clone(),
            events: Arc::new(EventStoreClient::new(event_server.uri())),
            registry: Arc::new(DeviceRegistryClient::new(registry_server.uri())),
            orchestrator: Arc::new(OrchestratorClient::new(orchestrator_server.uri(), "token")),
            generator,
            usage,
            publisher: Arc::new(NotificationPublisher::new(None)),
            community: None,
        };
        Harness {
            pipeline: Arc::new(PipelineOrchestrator::new(deps, 30)),
            store,
            _dir: dir,
        }
    }

    fn mount_empty_registry(server: &MockServer) -> impl std::future::Future<Output = ()> + '_ {
        async move {
            Mock::given(method("GET"))
                .and(path("/api/discovery/devices"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({ "devices": [] })),
                )
                .mount(server)
                .await;
            Mock::given(method("GET"))
                .and(path("/api/discovery/areas"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "areas": [] })),
                )
                .mount(server)
                .await;
        }
    }

    fn mount_empty_automations(server: &MockServer) -> impl std::future::Future<Output = ()> + '_ {
        async move {
            Mock::given(method("GET"))
                .and(path("/api/config/automation/config"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
                .mount(server)
                .await;
        }
    }

    fn daily_events(count: u32) -> serde_json::Value {
        let events: Vec<serde_json::Value> = (1..=count)
            .map(|day| {
                serde_json::json!({
                    "timestamp": format!("2025-10-{day:02}T07:05:00Z"),
                    "entity_id": "light.bedroom",
                    "device_id": "dev-bedroom",
                    "state": "on",
                    "attributes": {}
                })
            })
            .collect();
        serde_json::json!({ "events": events })
    }

    #[tokio::test]
    async fn zero_events_returns_no_data_and_persists_nothing() {
        let events = MockServer::start().await;
        let registry = MockServer::start().await;
        let orchestrator = MockServer::start().await;
        mount_empty_registry(&registry).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "events": [] })),
            )
            .mount(&events)
            .await;

        let h = harness(&events, &registry, &orchestrator, vec![]).await;
        let record = h
            .pipeline
            .run(CancellationToken::new(), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(record.status, RunStatus::NoData);
        assert_eq!(record.events_count, 0);
        assert_eq!(h.store.count(crate::store::Table::Patterns).unwrap(), 0);
        assert_eq!(h.store.count(crate::store::Table::Suggestions).unwrap(), 0);
    }

    #[tokio::test]
    async fn full_run_persists_patterns_suggestions_and_usage() {
        let events = MockServer::start().await;
        let registry = MockServer::start().await;
        let orchestrator = MockServer::start().await;
        mount_empty_registry(&registry).await;
        mount_empty_automations(&orchestrator).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(daily_events(30)))
            .mount(&events)
            .await;

        let reply = serde_json::json!({
            "title": "Morning bedroom light",
            "description": "Turn the bedroom light on at 07:05",
            "rationale": "Fires daily at the same minute",
            "category": "convenience",
            "priority": "high",
        })
        .to_string();

        let h = harness(&events, &registry, &orchestrator, vec![Ok(reply)]).await;
        let record = h
            .pipeline
            .run(CancellationToken::new(), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(record.events_count, 30);
        assert_eq!(record.patterns_detected, 1);
        assert_eq!(record.patterns_stored, 1);
        assert_eq!(record.suggestions_generated, 1);
        assert_eq!(record.llm_calls, 1);
        assert!(record.llm_cost_usd > 0.0);

        // Suggestions persisted equals non-failed LLM calls.
        let stored = h.store.list_suggestions(None, 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, SuggestionStatus::Pending);

        let usage = h
            .store
            .get_llm_usage(Utc::now().date_naive())
            .unwrap()
            .unwrap();
        assert_eq!(usage.calls, 1);

        // Phase timings recorded for every executed phase.
        for phase in [
            "capability_refresh",
            "event_fetch",
            "pattern_detection",
            "feature_synergy_analysis",
            "suggestion_generation",
            "notify",
        ] {
            assert!(record.phase_timings.contains_key(phase), "missing {phase}");
        }
    }

    #[tokio::test]
    async fn concurrent_trigger_is_rejected_with_already_running() {
        let events = MockServer::start().await;
        let registry = MockServer::start().await;
        let orchestrator = MockServer::start().await;
        mount_empty_registry(&registry).await;
        // Slow event fetch keeps the first run busy.
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "events": [] }))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&events)
            .await;

        let h = harness(&events, &registry, &orchestrator, vec![]).await;
        h.pipeline
            .spawn_run(CancellationToken::new(), Duration::from_secs(30))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.pipeline.is_running());
        let err = h
            .pipeline
            .spawn_run(CancellationToken::new(), Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning));

        // The slot frees up once the first run finishes.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!h.pipeline.is_running());
    }

    #[tokio::test]
    async fn cancellation_persists_partial_results_and_marks_cancelled() {
        let events = MockServer::start().await;
        let registry = MockServer::start().await;
        let orchestrator = MockServer::start().await;
        mount_empty_registry(&registry).await;
        mount_empty_automations(&orchestrator).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(daily_events(30)))
            .mount(&events)
            .await;

        let reply = serde_json::json!({
            "title": "Morning bedroom light",
            "description": "Turn the bedroom light on at 07:05",
            "rationale": "Fires daily",
            "category": "convenience",
            "priority": "high",
        })
        .to_string();
        let model = Arc::new(
            ScriptedChatModel::new(vec![Ok(reply)]).with_delay(Duration::from_millis(300)),
        );
        let h = harness_with_model(&events, &registry, &orchestrator, model).await;

        let cancel = CancellationToken::new();
        let run = {
            let pipeline = h.pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                pipeline.run(cancel, Duration::from_secs(30)).await.unwrap()
            })
        };
        // Cancel while the LLM phase is active: the in-flight call is allowed
        // to complete, earlier phases' results stay persisted, and the run is
        // marked cancelled instead of notifying.
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let record = run.await.unwrap();

        assert_eq!(record.status, RunStatus::Cancelled);
        assert_eq!(record.events_count, 30);
        assert_eq!(h.store.count(crate::store::Table::Patterns).unwrap(), 1);
        assert_eq!(record.llm_calls, 1);
        assert!(!record.phase_timings.contains_key("notify"));
    }

    #[tokio::test]
    async fn event_store_failure_aborts_the_run() {
        let events = MockServer::start().await;
        let registry = MockServer::start().await;
        let orchestrator = MockServer::start().await;
        mount_empty_registry(&registry).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&events)
            .await;

        let h = harness(&events, &registry, &orchestrator, vec![]).await;
        let record = h
            .pipeline
            .run(CancellationToken::new(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.error.unwrap().contains("event fetch failed"));
    }

    #[tokio::test]
    async fn history_is_bounded_and_newest_first() {
        let events = MockServer::start().await;
        let registry = MockServer::start().await;
        let orchestrator = MockServer::start().await;
        mount_empty_registry(&registry).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "events": [] })),
            )
            .mount(&events)
            .await;

        let h = harness(&events, &registry, &orchestrator, vec![]).await;
        for _ in 0..35 {
            h.pipeline
                .run(CancellationToken::new(), Duration::from_secs(30))
                .await
                .unwrap();
        }
        assert_eq!(h.pipeline.history(100).len(), JOB_HISTORY_LIMIT);
        assert_eq!(h.pipeline.history(5).len(), 5);
    }
}
