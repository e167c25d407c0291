use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::parse_cron;
use crate::pipeline::{JobRecord, PipelineError, PipelineOrchestrator};

/// Cron-style trigger for the daily analysis pipeline, plus the manual
/// trigger and stop plumbing the HTTP surface exposes.
pub struct Scheduler {
    schedule_expr: String,
    pipeline: Arc<PipelineOrchestrator>,
    run_timeout: Duration,
    /// Cancelling this token stops the loop and requests cancellation of the
    /// in-flight run at its next suspension point.
    shutdown: CancellationToken,
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub schedule: String,
    pub running: bool,
    pub next_run: Option<String>,
    pub history: Vec<JobRecord>,
}

impl Scheduler {
    pub fn new(
        schedule_expr: impl Into<String>,
        pipeline: Arc<PipelineOrchestrator>,
        run_timeout: Duration,
    ) -> Self {
        Self {
            schedule_expr: schedule_expr.into(),
            pipeline,
            run_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the trigger loop. The expression was validated at startup, so a
    /// parse failure here only happens if the config was mutated since.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let schedule = match parse_cron(&this.schedule_expr) {
                Ok(schedule) => schedule,
                Err(e) => {
                    tracing::error!("scheduler disabled, bad cron '{}': {e}", this.schedule_expr);
                    return;
                }
            };
            tracing::info!(
                "scheduler started: '{}', next run {:?}",
                this.schedule_expr,
                schedule.after(&Local::now()).next(),
            );

            loop {
                let Some(next) = schedule.after(&Local::now()).next() else {
                    tracing::warn!("cron '{}' has no future firings", this.schedule_expr);
                    return;
                };
                let wait = (next - Local::now())
                    .to_std()
                    .unwrap_or(Duration::from_secs(1));

                tokio::select! {
                    _ = this.shutdown.cancelled() => {
                        tracing::info!("scheduler stopped");
                        return;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }

                match this
                    .pipeline
                    .run(this.shutdown.child_token(), this.run_timeout)
                    .await
                {
                    Ok(record) => {
                        tracing::info!("scheduled run finished: {:?}", record.status);
                    }
                    Err(PipelineError::AlreadyRunning) => {
                        tracing::warn!("scheduled run skipped: previous run still active");
                    }
                }
            }
        });
    }

    /// Manual trigger; the run proceeds in the background. Errors with
    /// `already_running` when a run is active.
    pub fn trigger(&self, timeout: Option<Duration>) -> Result<(), PipelineError> {
        self.pipeline.spawn_run(
            self.shutdown.child_token(),
            timeout.unwrap_or(self.run_timeout),
        )
    }

    /// Request cancellation at the next suspension point and stop the loop.
    /// In-flight LLM calls complete; partial results stay persisted.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn next_run(&self) -> Option<DateTime<Local>> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        parse_cron(&self.schedule_expr)
            .ok()
            .and_then(|s| s.after(&Local::now()).next())
    }

    pub fn status(&self, history_limit: usize) -> SchedulerStatus {
        SchedulerStatus {
            schedule: self.schedule_expr.clone(),
            running: self.pipeline.is_running(),
            next_run: self.next_run().map(|t| t.to_rfc3339()),
            history: self.pipeline.history(history_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::event_store::EventStoreClient;
    use crate::clients::llm::ScriptedChatModel;
    use crate::clients::orchestrator::OrchestratorClient;
    use crate::clients::publisher::NotificationPublisher;
    use crate::clients::registry::DeviceRegistryClient;
    use crate::pipeline::PipelineDeps;
    use crate::store::SuggestionStore;
    use crate::suggestion_generator::SuggestionGenerator;
    use crate::usage_tracker::UsageTracker;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn scheduler_with_slow_pipeline(
    ) -> (Arc<Scheduler>, tempfile::TempDir, MockServer, MockServer, MockServer) {
        let events = MockServer::start().await;
        let registry = MockServer::start().await;
        let orchestrator = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/discovery/devices"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "devices": [] })),
            )
            .mount(&registry)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "events": [] }))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&events)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SuggestionStore::open(dir.path().join("s.db").to_str().unwrap()).unwrap(),
        );
        let usage = Arc::new(UsageTracker::default());
        let deps = PipelineDeps {
            store,
            events: Arc::new(EventStoreClient::new(events.uri())),
            registry: Arc::new(DeviceRegistryClient::new(registry.uri())),
            orchestrator: Arc::new(OrchestratorClient::new(orchestrator.uri(), "token")),
            generator: Arc::new(SuggestionGenerator::new(
                Arc::new(ScriptedChatModel::new(vec![])),
                usage.clone(),
                1,
            )),
            usage,
            publisher: Arc::new(NotificationPublisher::new(None)),
            community: None,
        };
        let pipeline = Arc::new(PipelineOrchestrator::new(deps, 30));
        let scheduler = Arc::new(Scheduler::new(
            "0 3 * * *",
            pipeline,
            Duration::from_secs(30),
        ));
        (scheduler, dir, events, registry, orchestrator)
    }

    #[tokio::test]
    async fn first_trigger_runs_in_background_second_is_rejected() {
        let (scheduler, _dir, _e, _r, _o) = scheduler_with_slow_pipeline().await;

        scheduler.trigger(None).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = scheduler.trigger(None).unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning));

        tokio::time::sleep(Duration::from_millis(600)).await;
        let status = scheduler.status(10);
        assert!(!status.running);
        assert_eq!(status.history.len(), 1);
    }

    #[tokio::test]
    async fn status_reports_schedule_and_next_run() {
        let (scheduler, _dir, _e, _r, _o) = scheduler_with_slow_pipeline().await;
        let status = scheduler.status(10);
        assert_eq!(status.schedule, "0 3 * * *");
        assert!(!status.running);
        assert!(status.next_run.is_some());
    }

    #[tokio::test]
    async fn stop_clears_next_run_and_is_idempotent() {
        let (scheduler, _dir, _e, _r, _o) = scheduler_with_slow_pipeline().await;
        scheduler.start();
        assert!(scheduler.next_run().is_some());
        scheduler.stop();
        scheduler.stop();
        assert!(scheduler.is_stopped());
        assert!(scheduler.next_run().is_none());
    }
}
