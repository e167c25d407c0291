use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::clients::community::CommunityAutomation;
use crate::clients::llm::{ChatModel, ChatRequest, ChatResponse};
use crate::error::ClientError;
use crate::models::capability::CapabilityRecord;
use crate::models::device::DeviceRecord;
use crate::models::pattern::Pattern;
use crate::models::suggestion::{
    Category, Priority, Suggestion, SuggestionSource, SuggestionStatus,
};
use crate::models::synergy::{FeatureOpportunity, SynergyOpportunity};
use crate::prompt_builder::{
    BuiltPrompt, DeviceContext, UnifiedPromptBuilder, DESCRIPTION_SCHEMA_REMINDER,
};
use crate::usage_tracker::UsageTracker;

pub const DESCRIPTION_MAX_TOKENS: u32 = 300;
pub const AUTOMATION_MAX_TOKENS: u32 = 600;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// The final ranked list is truncated to this many suggestions.
const MAX_SUGGESTIONS: usize = 10;
const MAX_PATTERN_CANDIDATES: usize = 10;
const MAX_FEATURE_CANDIDATES: usize = 10;
const MAX_SYNERGY_CANDIDATES: usize = 5;

/// Turns patterns, opportunities and synergies into Suggestion records by
/// fanning prompted LLM calls through a bounded-concurrency pool, then
/// deduplicates and ranks the output.
pub struct SuggestionGenerator {
    llm: Arc<dyn ChatModel>,
    usage: Arc<UsageTracker>,
    builder: UnifiedPromptBuilder,
    concurrency: usize,
    temperature: f64,
}

/// Enriched device context lookup, keyed both ways because patterns talk
/// about entities while opportunities and synergies talk about devices.
#[derive(Debug, Default, Clone)]
pub struct DeviceContextIndex {
    pub by_entity: BTreeMap<String, DeviceContext>,
    pub by_device: BTreeMap<String, Vec<DeviceContext>>,
}

impl DeviceContextIndex {
    pub fn build(
        devices: &[DeviceRecord],
        area_names: &BTreeMap<String, String>,
        capability_index: &BTreeMap<String, CapabilityRecord>,
    ) -> Self {
        let mut index = Self::default();
        for device in devices {
            let capabilities: Vec<String> = capability_index
                .get(&device.model)
                .map(|r| r.capabilities.keys().cloned().collect())
                .unwrap_or_default();
            let area = device
                .area_id
                .as_ref()
                .map(|id| area_names.get(id).cloned().unwrap_or_else(|| id.clone()));

            for entity in &device.entities {
                let context = DeviceContext {
                    entity_id: entity.entity_id.clone(),
                    friendly_name: entity
                        .friendly_name
                        .clone()
                        .unwrap_or_else(|| device.name.clone()),
                    manufacturer: device.manufacturer.clone(),
                    model: device.model.clone(),
                    area: area.clone(),
                    health_score: device.health_score,
                    capabilities: capabilities.clone(),
                };
                index
                    .by_device
                    .entry(device.device_id.clone())
                    .or_default()
                    .push(context.clone());
                index.by_entity.insert(entity.entity_id.clone(), context);
            }
        }
        index
    }

    /// Context rows for a mixed list of entity and device identifiers.
    pub fn lookup(&self, ids: &[String]) -> Vec<DeviceContext> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(context) = self.by_entity.get(id) {
                out.push(context.clone());
            } else if let Some(contexts) = self.by_device.get(id) {
                out.extend(contexts.iter().cloned());
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct GenerationOutcome {
    pub suggestions: Vec<Suggestion>,
    /// Per-suggestion error entries for calls that failed twice.
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptionPayload {
    title: String,
    description: String,
    #[serde(default)]
    rationale: String,
    category: String,
    priority: String,
}

impl SuggestionGenerator {
    pub fn new(llm: Arc<dyn ChatModel>, usage: Arc<UsageTracker>, concurrency: usize) -> Self {
        Self {
            llm,
            usage,
            builder: UnifiedPromptBuilder,
            concurrency: concurrency.max(1),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Daily-batch entry point: describe the best candidates from every
    /// source, then rank across sources and keep the top ten.
    pub async fn generate_suggestions(
        &self,
        patterns: &[Pattern],
        opportunities: &[FeatureOpportunity],
        synergies: &[SynergyOpportunity],
        context: &DeviceContextIndex,
        enhancements: &[CommunityAutomation],
    ) -> GenerationOutcome {
        let mut ranked_patterns: Vec<&Pattern> = patterns.iter().collect();
        ranked_patterns.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut ranked_synergies: Vec<&SynergyOpportunity> = synergies.iter().collect();
        ranked_synergies.sort_by(|a, b| {
            b.impact_score
                .partial_cmp(&a.impact_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        struct Candidate {
            prompt: BuiltPrompt,
            source: SuggestionSource,
            confidence: f64,
            pattern_ref: Option<String>,
            synergy_ref: Option<String>,
            entities: Vec<String>,
            label: String,
        }

        let mut candidates = Vec::new();
        for pattern in ranked_patterns.into_iter().take(MAX_PATTERN_CANDIDATES) {
            let entities: Vec<String> =
                pattern.entities().into_iter().map(str::to_string).collect();
            candidates.push(Candidate {
                prompt: self
                    .builder
                    .pattern_prompt(pattern, &context.lookup(&entities), enhancements),
                source: SuggestionSource::Pattern,
                confidence: pattern.confidence,
                pattern_ref: Some(pattern.pattern_id.clone()),
                synergy_ref: None,
                entities,
                label: pattern.pattern_id.clone(),
            });
        }
        for opportunity in opportunities.iter().take(MAX_FEATURE_CANDIDATES) {
            let ids = vec![opportunity.device_id.clone()];
            let contexts = context.lookup(&ids);
            candidates.push(Candidate {
                prompt: self.builder.feature_prompt(opportunity, &contexts),
                source: SuggestionSource::Feature,
                confidence: opportunity.priority_score as f64 / 9.0,
                pattern_ref: None,
                synergy_ref: None,
                entities: contexts.iter().map(|c| c.entity_id.clone()).collect(),
                label: format!("{}:{}", opportunity.device_id, opportunity.feature_name),
            });
        }
        for synergy in ranked_synergies.into_iter().take(MAX_SYNERGY_CANDIDATES) {
            let contexts = context.lookup(&synergy.devices);
            candidates.push(Candidate {
                prompt: self.builder.synergy_prompt(synergy, &contexts),
                source: SuggestionSource::Synergy,
                confidence: synergy.confidence,
                pattern_ref: None,
                synergy_ref: Some(synergy.synergy_id.clone()),
                entities: contexts.iter().map(|c| c.entity_id.clone()).collect(),
                label: synergy.synergy_id.clone(),
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let futures = candidates.into_iter().map(|candidate| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let described = self.describe(&candidate.prompt).await;
                (candidate, described)
            }
        });
        let results = futures_util::future::join_all(futures).await;

        let mut outcome = GenerationOutcome::default();
        let now = Utc::now();
        for (candidate, described) in results {
            match described {
                Ok(payload) => {
                    let (category, priority) = match parse_taxonomy(&payload) {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!("{}: {e}", candidate.label);
                            outcome.errors.push(format!("{}: {e}", candidate.label));
                            continue;
                        }
                    };
                    outcome.suggestions.push(Suggestion {
                        id: uuid::Uuid::new_v4().to_string(),
                        source: candidate.source,
                        title: payload.title,
                        description: payload.description,
                        rationale: payload.rationale,
                        automation_spec: None,
                        confidence: candidate.confidence,
                        category,
                        priority,
                        status: SuggestionStatus::Pending,
                        created_at: now,
                        updated_at: now,
                        pattern_ref: candidate.pattern_ref,
                        synergy_ref: candidate.synergy_ref,
                        validated_entities: candidate.entities,
                    });
                }
                Err(e) => {
                    tracing::warn!("suggestion for {} failed: {e}", candidate.label);
                    outcome.errors.push(format!("{}: {e}", candidate.label));
                }
            }
        }

        rank_and_dedup(&mut outcome.suggestions);
        tracing::info!(
            "generated {} suggestions ({} failures)",
            outcome.suggestions.len(),
            outcome.errors.len(),
        );
        outcome
    }

    /// Materialise an approved suggestion into a YAML automation
    /// specification referencing only the validated entities.
    pub async fn generate_automation(
        &self,
        suggestion: &Suggestion,
        validated: &[DeviceContext],
    ) -> Result<String, String> {
        let prompt = self.builder.yaml_generation_prompt(suggestion, validated);
        let first = self
            .call(&prompt, AUTOMATION_MAX_TOKENS)
            .await
            .map_err(|e| e.to_string())?;
        match extract_yaml(&first.content) {
            Ok(spec) => Ok(spec),
            Err(first_err) => {
                let retry = BuiltPrompt {
                    system: prompt.system.clone(),
                    user: format!(
                        "{}\n\nYour previous reply was not a valid YAML mapping. \
                         Reply with exactly one valid YAML automation document and nothing else.",
                        prompt.user
                    ),
                };
                let second = self
                    .call(&retry, AUTOMATION_MAX_TOKENS)
                    .await
                    .map_err(|e| e.to_string())?;
                extract_yaml(&second.content)
                    .map_err(|second_err| format!("{first_err}; retry: {second_err}"))
            }
        }
    }

    /// One description attempt plus one schema-reminder regeneration.
    async fn describe(&self, prompt: &BuiltPrompt) -> Result<DescriptionPayload, String> {
        let first = self
            .call(prompt, DESCRIPTION_MAX_TOKENS)
            .await
            .map_err(|e| e.to_string())?;
        match parse_description(&first.content) {
            Ok(payload) => Ok(payload),
            Err(first_err) => {
                let retry = BuiltPrompt {
                    system: prompt.system.clone(),
                    user: format!("{}\n\n{DESCRIPTION_SCHEMA_REMINDER}", prompt.user),
                };
                let second = self
                    .call(&retry, DESCRIPTION_MAX_TOKENS)
                    .await
                    .map_err(|e| e.to_string())?;
                parse_description(&second.content)
                    .map_err(|second_err| format!("{first_err}; retry: {second_err}"))
            }
        }
    }

    async fn call(
        &self,
        prompt: &BuiltPrompt,
        max_tokens: u32,
    ) -> Result<ChatResponse, ClientError> {
        let request = ChatRequest {
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            temperature: self.temperature,
            max_tokens,
        };
        match self.llm.complete(request).await {
            Ok(response) => {
                self.usage
                    .record_call(response.input_tokens, response.output_tokens);
                Ok(response)
            }
            Err(e) => {
                self.usage.record_failure();
                Err(e)
            }
        }
    }
}

fn parse_taxonomy(payload: &DescriptionPayload) -> Result<(Category, Priority), String> {
    let category = Category::parse(&payload.category)
        .ok_or_else(|| format!("unknown category '{}'", payload.category))?;
    let priority = Priority::parse(&payload.priority)
        .ok_or_else(|| format!("unknown priority '{}'", payload.priority))?;
    Ok((category, priority))
}

/// Pull the JSON object out of a completion, tolerating markdown fences and
/// prose around it.
fn parse_description(content: &str) -> Result<DescriptionPayload, String> {
    let stripped = strip_fences(content);
    let start = stripped.find('{').ok_or("no JSON object in reply")?;
    let end = stripped.rfind('}').ok_or("unterminated JSON object in reply")?;
    if end < start {
        return Err("unterminated JSON object in reply".to_string());
    }
    let payload: DescriptionPayload = serde_json::from_str(&stripped[start..=end])
        .map_err(|e| format!("reply did not match the schema: {e}"))?;
    if payload.title.trim().is_empty() || payload.description.trim().is_empty() {
        return Err("reply had an empty title or description".to_string());
    }
    // Taxonomy violations count as schema failures so they hit the retry.
    parse_taxonomy(&payload)?;
    Ok(payload)
}

/// A reply is an acceptable automation spec when it parses as a YAML mapping.
fn extract_yaml(content: &str) -> Result<String, String> {
    let cleaned = strip_fences(content).trim().to_string();
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(&cleaned).map_err(|e| format!("reply was not valid YAML: {e}"))?;
    if !parsed.is_mapping() {
        return Err("reply was not a YAML mapping".to_string());
    }
    Ok(cleaned)
}

fn strip_fences(content: &str) -> String {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag line, then everything after the closing fence.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.rsplit_once("```")
        .map(|(b, _)| b)
        .unwrap_or(body)
        .trim()
        .to_string()
}

/// Confidence descending, ties by priority weight descending. Duplicates
/// collapse to the strongest entry, where the dedup key is the composite of
/// case-insensitive title, source, and pattern/synergy ref: two suggestions
/// from different refs are distinct even when the LLM reuses a title.
/// Truncated to the global cap.
fn rank_and_dedup(suggestions: &mut Vec<Suggestion>) {
    suggestions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.priority.weight().cmp(&a.priority.weight()))
            .then_with(|| a.title.cmp(&b.title))
    });

    let mut seen = std::collections::HashSet::new();
    suggestions.retain(|s| {
        let key = (
            s.title.trim().to_lowercase(),
            s.source.as_str(),
            s.pattern_ref.clone().or_else(|| s.synergy_ref.clone()),
        );
        seen.insert(key)
    });
    suggestions.truncate(MAX_SUGGESTIONS);
}
