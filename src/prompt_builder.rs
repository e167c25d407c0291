use crate::clients::community::CommunityAutomation;
use crate::models::pattern::{Pattern, PatternKind};
use crate::models::suggestion::Suggestion;
use crate::models::synergy::{FeatureOpportunity, SynergyOpportunity};

/// The one system prompt every LLM interaction uses.
const SYSTEM_PROMPT: &str = "\
You are an experienced smart-home automation expert with deep knowledge of \
device capabilities and home orchestration best practices.

Guidelines:
- Use device friendly names, never bare entity ids, in descriptions
- Leverage actual device capabilities when they are listed (LED notifications, \
smart bulb modes, auto-off timers, and similar)
- Prefer devices with health scores of 70 or above; avoid devices below 50
- Keep automations simple, practical and easy to understand
- Think beyond basic on/off patterns, but never invent devices or entities \
that were not provided";

/// JSON schema reminder appended on a regeneration attempt after a parse
/// failure.
pub const DESCRIPTION_SCHEMA_REMINDER: &str = "\
Reply with exactly one JSON object and nothing else, in exactly this schema:\n\
{\"title\": \"...\", \"description\": \"...\", \"rationale\": \"...\", \
\"category\": \"energy|comfort|security|convenience\", \
\"priority\": \"high|medium|low\"}";

const DESCRIPTION_INSTRUCTIONS: &str = "\
Reply with a single JSON object with exactly these keys: \
\"title\" (short, imperative), \"description\" (one or two sentences a \
homeowner understands), \"rationale\" (why the data supports it), \
\"category\" (one of: energy, comfort, security, convenience), \
\"priority\" (one of: high, medium, low). No YAML, no markdown.";

/// Enriched device context handed to every template. The generator must
/// never pass raw entity identifiers alone.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub entity_id: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model: String,
    pub area: Option<String>,
    pub health_score: Option<f64>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub system: String,
    pub user: String,
}

/// Central prompt construction: components never concatenate prompt strings
/// themselves, they pick one of the per-source templates here.
pub struct UnifiedPromptBuilder;

impl UnifiedPromptBuilder {
    pub fn pattern_prompt(
        &self,
        pattern: &Pattern,
        context: &[DeviceContext],
        enhancements: &[CommunityAutomation],
    ) -> BuiltPrompt {
        let device_section = device_section(context);
        let pattern_section = match &pattern.kind {
            PatternKind::TimeOfDay {
                hour,
                minute,
                std_minutes,
                total_events,
                ..
            } => format!(
                "Time-of-day pattern detected:\n\
                 - Usual time: {hour:02}:{minute:02} (± {std_minutes:.0} min)\n\
                 - Confidence: {:.0}% ({} of {} events)\n",
                pattern.confidence * 100.0,
                pattern.occurrences,
                total_events,
            ),
            PatternKind::CoOccurrence {
                avg_delta_seconds,
                window_seconds,
                ..
            } => format!(
                "Co-occurrence pattern detected:\n\
                 - The second device fires about {avg_delta_seconds:.0} s after the first \
                 (window {window_seconds} s)\n\
                 - Confidence: {:.0}% across {} co-occurrences\n",
                pattern.confidence * 100.0,
                pattern.occurrences,
            ),
        };

        let mut user = format!(
            "{pattern_section}\nDevices involved:\n{device_section}\n"
        );
        if !enhancements.is_empty() {
            user.push_str("\nPopular community automations for similar devices:\n");
            for e in enhancements.iter().take(3) {
                user.push_str(&format!("- {}: {}\n", e.title, e.description));
            }
        }
        user.push_str(
            "\nSuggest one automation for this pattern that the homeowner would plausibly want.\n",
        );
        user.push_str(DESCRIPTION_INSTRUCTIONS);

        BuiltPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }

    pub fn feature_prompt(
        &self,
        opportunity: &FeatureOpportunity,
        context: &[DeviceContext],
    ) -> BuiltPrompt {
        let user = format!(
            "Unused device feature:\n\
             - Device: {} ({} {})\n\
             - Feature: {} ({}, complexity {}, impact {})\n\
             \nDevice context:\n{}\n\
             \nSuggest one automation that puts this specific feature to work.\n{}",
            opportunity.device_name,
            opportunity.manufacturer,
            opportunity.model,
            opportunity.feature_name,
            opportunity.feature_kind,
            opportunity.complexity.as_str(),
            opportunity.impact.as_str(),
            device_section(context),
            DESCRIPTION_INSTRUCTIONS,
        );
        BuiltPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }

    pub fn synergy_prompt(
        &self,
        synergy: &SynergyOpportunity,
        context: &[DeviceContext],
    ) -> BuiltPrompt {
        let user = format!(
            "Cross-device opportunity detected:\n\
             - Type: {}\n\
             - Relationship: {}\n\
             - Area: {}\n\
             - Impact score: {:.2}\n\
             \nDevices involved:\n{}\n\
             \nSuggest one automation connecting these devices.\n{}",
            synergy.synergy_type.as_str(),
            synergy.relationship,
            synergy.area.as_deref().unwrap_or("unknown"),
            synergy.impact_score,
            device_section(context),
            DESCRIPTION_INSTRUCTIONS,
        );
        BuiltPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }

    /// Prompt for materialising an approved suggestion into an executable
    /// automation specification. Only validated entity ids may appear.
    pub fn yaml_generation_prompt(
        &self,
        suggestion: &Suggestion,
        validated: &[DeviceContext],
    ) -> BuiltPrompt {
        let entity_list = validated
            .iter()
            .map(|c| format!("- {}: {}", c.friendly_name, c.entity_id))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Generate an automation specification for this approved suggestion.\n\
             \nSuggestion: \"{}\"\nDetails: {}\n\
             \nValidated entity ids (USE ONLY THESE):\n{entity_list}\n\
             \nRequirements:\n\
             1. Reply with a single YAML document, no markdown fences\n\
             2. Include: id, alias, description, trigger, action, mode\n\
             3. Use ONLY the validated entity ids listed above; do not invent ids\n\
             4. Add conditions where they make the automation safer or less noisy",
            suggestion.title, suggestion.description,
        );
        BuiltPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

fn device_section(context: &[DeviceContext]) -> String {
    if context.is_empty() {
        return "No specific device context available.".to_string();
    }
    context
        .iter()
        .map(|c| {
            let mut line = format!("- {} ({})", c.friendly_name, c.entity_id);
            if !c.manufacturer.is_empty() {
                line.push_str(&format!(" [{} {}]", c.manufacturer, c.model));
            }
            if let Some(area) = &c.area {
                line.push_str(&format!(" [area: {area}]"));
            }
            if let Some(health) = c.health_score {
                line.push_str(&format!(" [health: {health:.0}]"));
            }
            if !c.capabilities.is_empty() {
                line.push_str(&format!(" [capabilities: {}]", c.capabilities.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::suggestion::{
        Category, Priority, SuggestionSource, SuggestionStatus,
    };
    use chrono::Utc;

    fn context() -> Vec<DeviceContext> {
        vec![DeviceContext {
            entity_id: "light.kitchen".to_string(),
            friendly_name: "Kitchen Light".to_string(),
            manufacturer: "Inovelli".to_string(),
            model: "VZM31-SN".to_string(),
            area: Some("kitchen".to_string()),
            health_score: Some(92.0),
            capabilities: vec!["led_notifications".to_string()],
        }]
    }

    fn tod_pattern() -> Pattern {
        Pattern {
            pattern_id: "tod-light.kitchen-07:05".to_string(),
            kind: PatternKind::TimeOfDay {
                entity_id: "light.kitchen".to_string(),
                hour: 7,
                minute: 5,
                std_minutes: 3.0,
                total_events: 30,
            },
            confidence: 0.95,
            occurrences: 28,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pattern_prompt_carries_friendly_names_and_capabilities() {
        let prompt = UnifiedPromptBuilder.pattern_prompt(&tod_pattern(), &context(), &[]);
        assert!(prompt.user.contains("Kitchen Light"));
        assert!(prompt.user.contains("07:05"));
        assert!(prompt.user.contains("led_notifications"));
        assert!(prompt.user.contains("\"category\""));
        assert!(prompt.system.contains("automation expert"));
    }

    #[test]
    fn pattern_prompt_includes_community_enhancements_when_present() {
        let enhancement = CommunityAutomation {
            title: "Sunrise dimmer".to_string(),
            description: "Fade the light in over 10 minutes".to_string(),
            quality: 0.9,
            devices: vec!["light".to_string()],
        };
        let prompt =
            UnifiedPromptBuilder.pattern_prompt(&tod_pattern(), &context(), &[enhancement]);
        assert!(prompt.user.contains("Sunrise dimmer"));
    }

    #[test]
    fn yaml_prompt_pins_to_validated_entities_only() {
        let suggestion = Suggestion {
            id: "s1".to_string(),
            source: SuggestionSource::Pattern,
            title: "Morning kitchen light".to_string(),
            description: "Turn the kitchen light on at 07:05".to_string(),
            rationale: String::new(),
            automation_spec: None,
            confidence: 0.95,
            category: Category::Convenience,
            priority: Priority::High,
            status: SuggestionStatus::Approved,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            pattern_ref: None,
            synergy_ref: None,
            validated_entities: vec!["light.kitchen".to_string()],
        };
        let prompt = UnifiedPromptBuilder.yaml_generation_prompt(&suggestion, &context());
        assert!(prompt.user.contains("USE ONLY THESE"));
        assert!(prompt.user.contains("light.kitchen"));
        assert!(prompt.user.contains("single YAML document"));
    }

    #[test]
    fn empty_context_is_stated_not_omitted() {
        let prompt = UnifiedPromptBuilder.pattern_prompt(&tod_pattern(), &[], &[]);
        assert!(prompt.user.contains("No specific device context available."));
    }
}
