use std::process::ExitCode;
use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ha_insight::clients::community::CommunityClient;
use ha_insight::clients::event_store::EventStoreClient;
use ha_insight::clients::llm::LlmClient;
use ha_insight::clients::orchestrator::OrchestratorClient;
use ha_insight::clients::publisher::NotificationPublisher;
use ha_insight::clients::registry::DeviceRegistryClient;
use ha_insight::config::AppConfig;
use ha_insight::handlers;
use ha_insight::pipeline::{PipelineDeps, PipelineOrchestrator};
use ha_insight::scheduler::Scheduler;
use ha_insight::store::SuggestionStore;
use ha_insight::suggestion_generator::SuggestionGenerator;
use ha_insight::usage_tracker::UsageTracker;
use ha_insight::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("ha_insight={log_level},tower_http=info"))),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(1);
        }
    };

    let store = match SuggestionStore::open(&config.database_url) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("failed to open store at {}: {e}", config.database_url);
            return ExitCode::from(2);
        }
    };
    tracing::info!("store opened at {}", config.database_url);

    let events = Arc::new(EventStoreClient::new(config.event_store_url.clone()));
    let registry = Arc::new(DeviceRegistryClient::new(config.registry_url.clone()));
    let orchestrator = Arc::new(OrchestratorClient::new(
        config.orchestrator_url.clone(),
        config.orchestrator_token.clone(),
    ));
    let llm = Arc::new(LlmClient::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
    ));
    let usage = Arc::new(UsageTracker::default());
    let generator = Arc::new(SuggestionGenerator::new(
        llm,
        usage.clone(),
        config.concurrency,
    ));
    let publisher = Arc::new(NotificationPublisher::new(config.notifier_url.clone()));
    if publisher.is_enabled() {
        tracing::info!("notification publisher enabled");
    }
    let community = config
        .community_url
        .clone()
        .map(|url| Arc::new(CommunityClient::new(url)));

    let pipeline = Arc::new(PipelineOrchestrator::new(
        PipelineDeps {
            store: store.clone(),
            events: events.clone(),
            registry: registry.clone(),
            orchestrator: orchestrator.clone(),
            generator: generator.clone(),
            usage: usage.clone(),
            publisher,
            community,
        },
        config.analysis_days,
    ));
    let scheduler = Arc::new(Scheduler::new(
        config.schedule_cron.clone(),
        pipeline.clone(),
        config.pipeline_timeout,
    ));
    scheduler.start();

    let state = AppState {
        config: config.clone(),
        store,
        events,
        registry,
        orchestrator,
        generator,
        usage,
        pipeline,
        scheduler: scheduler.clone(),
    };

    let app = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        // Data proxies
        .route("/api/data/events", get(handlers::data::events))
        .route("/api/data/entities", get(handlers::data::entities))
        .route("/api/data/devices", get(handlers::data::devices))
        // Patterns
        .route(
            "/api/patterns/detect/time-of-day",
            post(handlers::patterns::detect_time_of_day),
        )
        .route("/api/patterns/list", get(handlers::patterns::list))
        .route("/api/patterns/stats", get(handlers::patterns::stats))
        .route("/api/patterns/cleanup", delete(handlers::patterns::cleanup))
        // Suggestions
        .route(
            "/api/suggestions/generate",
            post(handlers::suggestions::generate),
        )
        .route("/api/suggestions/list", get(handlers::suggestions::list))
        .route(
            "/api/suggestions/{id}/approve",
            patch(handlers::suggestions::approve),
        )
        .route(
            "/api/suggestions/{id}/reject",
            patch(handlers::suggestions::reject),
        )
        .route(
            "/api/suggestions/{id}",
            patch(handlers::suggestions::update).delete(handlers::suggestions::delete),
        )
        .route(
            "/api/suggestions/batch/approve",
            post(handlers::suggestions::batch_approve),
        )
        .route(
            "/api/suggestions/batch/reject",
            post(handlers::suggestions::batch_reject),
        )
        // Analysis & scheduler controls
        .route(
            "/api/analysis/analyze-and-suggest",
            post(handlers::analysis::analyze_and_suggest),
        )
        .route("/api/analysis/trigger", post(handlers::analysis::trigger))
        .route("/api/analysis/schedule", get(handlers::analysis::schedule))
        .route("/api/analysis/status", get(handlers::analysis::status))
        .route("/api/analysis/stop", post(handlers::analysis::stop))
        // Deploy
        .route("/api/deploy/{id}", post(handlers::deploy::deploy))
        // Synergies
        .route("/api/synergies", get(handlers::synergies::list))
        .route("/api/synergies/stats", get(handlers::synergies::stats))
        .route("/api/synergies/{id}", get(handlers::synergies::get))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("ha-insight listening on {}", config.bind_addr);
    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}: {e}", config.bind_addr);
            return ExitCode::from(1);
        }
    };

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        scheduler.stop();
    });
    if let Err(e) = serve.await {
        tracing::error!("server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
