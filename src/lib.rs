pub mod capability_parser;
pub mod clients;
pub mod config;
pub mod detectors;
pub mod error;
pub mod feature_analyzer;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod prompt_builder;
pub mod safety_validator;
pub mod scheduler;
pub mod store;
pub mod suggestion_generator;
pub mod synergy_detector;
pub mod usage_tracker;

use std::sync::Arc;

use clients::event_store::EventStoreClient;
use clients::orchestrator::OrchestratorClient;
use clients::registry::DeviceRegistryClient;
use config::AppConfig;
use pipeline::PipelineOrchestrator;
use scheduler::Scheduler;
use store::SuggestionStore;
use suggestion_generator::SuggestionGenerator;
use usage_tracker::UsageTracker;

/// Root application state: every component is owned here and injected
/// downward, so the dependency graph stays one-directional.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<SuggestionStore>,
    pub events: Arc<EventStoreClient>,
    pub registry: Arc<DeviceRegistryClient>,
    pub orchestrator: Arc<OrchestratorClient>,
    pub generator: Arc<SuggestionGenerator>,
    pub usage: Arc<UsageTracker>,
    pub pipeline: Arc<PipelineOrchestrator>,
    pub scheduler: Arc<Scheduler>,
}
