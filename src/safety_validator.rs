use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::config::SafetyLevel;
use crate::models::automation::{extract_entities, extract_services, AutomationRule};

/// High-power target domains flagged on every deploy.
const HIGH_ENERGY_DOMAINS: &[&str] = &["climate", "water_heater", "fan"];
/// Text fragments that smell like an always-on trigger.
const TIME_CONFLICT_KEYWORDS: &[&str] = &["always", "continuously", "every 0", "every second"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyIssue {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    pub recommendation: String,
    pub details: Value,
}

#[derive(Debug, Default, Serialize)]
pub struct SafetyReport {
    pub safe: bool,
    pub critical: Vec<SafetyIssue>,
    pub warnings: Vec<SafetyIssue>,
    pub infos: Vec<SafetyIssue>,
    /// Fraction of the check suite that ran; a parse failure stops at 0.
    pub coverage: f64,
    /// 100 minus penalties per finding, floored at 0. Compared against the
    /// configured minimum score before a deploy is allowed.
    pub score: i64,
}

impl SafetyReport {
    fn push(&mut self, issue: SafetyIssue) {
        match issue.severity {
            Severity::Critical => self.critical.push(issue),
            Severity::Warning => self.warnings.push(issue),
            Severity::Info => self.infos.push(issue),
        }
    }

    fn finalize(mut self, coverage: f64) -> Self {
        self.safe = self.critical.is_empty();
        self.coverage = coverage;
        self.score = (100i64
            - 40 * self.critical.len() as i64
            - 10 * self.warnings.len() as i64)
            .max(0);
        self
    }
}

/// Gates a candidate automation specification before it can be deployed.
/// Pure with respect to its inputs: the caller supplies the known-entity
/// set and the current automation listing.
pub struct SafetyValidator {
    pub level: SafetyLevel,
}

impl SafetyValidator {
    pub fn new(level: SafetyLevel) -> Self {
        Self { level }
    }

    pub fn validate(
        &self,
        spec_yaml: &str,
        validated_entities: &[String],
        known_entities: &BTreeSet<String>,
        existing_automations: &[AutomationRule],
    ) -> SafetyReport {
        let mut report = SafetyReport::default();

        // 1. Parse. Everything else needs a well-formed document.
        let spec = match parse_spec(spec_yaml) {
            Ok(spec) => spec,
            Err(e) => {
                report.push(SafetyIssue {
                    severity: Severity::Critical,
                    category: "invalid".to_string(),
                    message: format!("automation specification does not parse: {e}"),
                    recommendation: "Fix the specification syntax before deploying".to_string(),
                    details: Value::Null,
                });
                return report.finalize(0.0);
            }
        };

        let validated: BTreeSet<&str> = validated_entities.iter().map(String::as_str).collect();
        let trigger_entities = extract_entities(spec.get("trigger"));
        let action_entities = extract_entities(spec.get("action"));
        let condition_entities = extract_entities(spec.get("condition"));

        // 2. Entity availability.
        let all_entities: BTreeSet<&String> = trigger_entities
            .iter()
            .chain(action_entities.iter())
            .chain(condition_entities.iter())
            .collect();
        for entity_id in all_entities {
            if known_entities.contains(entity_id.as_str()) {
                continue;
            }
            let was_validated = validated.contains(entity_id.as_str());
            let suggestions = fuzzy_entity_suggestions(entity_id, known_entities);
            let mut recommendation = format!("Verify that {entity_id} exists on the orchestrator.");
            if !suggestions.is_empty() {
                recommendation.push_str(&format!(" Did you mean: {}?", suggestions.join(", ")));
            }
            report.push(SafetyIssue {
                severity: if was_validated {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
                category: "availability".to_string(),
                message: format!("entity not found: {entity_id}"),
                recommendation,
                details: serde_json::json!({
                    "entity_id": entity_id,
                    "was_validated": was_validated,
                    "suggestions": suggestions,
                }),
            });
        }

        // 3. Dangerous actions.
        for service in extract_services(spec.get("action")) {
            let (domain, action) = service.split_once('.').unwrap_or((service.as_str(), ""));
            let dangerous = (domain == "lock" && action == "unlock")
                || (domain == "alarm_control_panel" && action == "disarm");
            if dangerous {
                report.push(SafetyIssue {
                    severity: Severity::Critical,
                    category: "dangerous".to_string(),
                    message: format!("dangerous action: {service}"),
                    recommendation: "Review this action carefully before deploying".to_string(),
                    details: serde_json::json!({ "service": service }),
                });
            }
        }

        // 4. High-energy actions.
        for entity_id in &action_entities {
            let domain = entity_id.split('.').next().unwrap_or("");
            if HIGH_ENERGY_DOMAINS.contains(&domain) {
                report.push(SafetyIssue {
                    severity: self.downgradeable(Severity::Warning),
                    category: "energy".to_string(),
                    message: format!("high-energy device targeted: {entity_id}"),
                    recommendation:
                        "Consider scheduling this during off-peak hours and watch consumption"
                            .to_string(),
                    details: serde_json::json!({ "entity_id": entity_id, "domain": domain }),
                });
            }
        }

        // 5. Time conflicts.
        let alias = spec.get("alias").and_then(Value::as_str).unwrap_or("");
        let description = spec.get("description").and_then(Value::as_str).unwrap_or("");
        let text = format!("{alias} {description}").to_lowercase();
        let condition_text = spec
            .get("condition")
            .map(|c| c.to_string().to_lowercase())
            .unwrap_or_default();
        for keyword in TIME_CONFLICT_KEYWORDS {
            if text.contains(keyword) || condition_text.contains(keyword) {
                report.push(SafetyIssue {
                    severity: self.downgradeable(Severity::Warning),
                    category: "time".to_string(),
                    message: format!("possible time conflict: \"{keyword}\""),
                    recommendation: "Check that the trigger cadence is realistic".to_string(),
                    details: serde_json::json!({ "keyword": keyword }),
                });
            }
        }

        // 6. Conflict with existing automations.
        let existing_pairs: BTreeSet<(String, String)> = existing_automations
            .iter()
            .flat_map(|a| a.entity_pairs())
            .collect();
        for t in &trigger_entities {
            for a in &action_entities {
                if existing_pairs.contains(&(t.clone(), a.clone())) {
                    report.push(SafetyIssue {
                        severity: if self.level == SafetyLevel::Strict {
                            Severity::Critical
                        } else {
                            Severity::Warning
                        },
                        category: "conflict".to_string(),
                        message: format!("an automation already connects {t} to {a}"),
                        recommendation: "Review the existing automation to avoid double-firing"
                            .to_string(),
                        details: serde_json::json!({
                            "trigger_entity": t,
                            "action_entity": a,
                        }),
                    });
                }
            }
        }

        report.finalize(1.0)
    }

    fn downgradeable(&self, severity: Severity) -> Severity {
        if self.level == SafetyLevel::Permissive {
            Severity::Info
        } else {
            severity
        }
    }
}

fn parse_spec(spec_yaml: &str) -> Result<Value, String> {
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(spec_yaml).map_err(|e| e.to_string())?;
    if parsed.is_null() {
        return Err("empty specification".to_string());
    }
    let json = serde_json::to_value(&parsed).map_err(|e| e.to_string())?;
    if !json.is_object() {
        return Err("specification is not a mapping".to_string());
    }
    Ok(json)
}

/// Fuzzy suggestions for a missing entity, probing name permutations against
/// the registry in a fixed order: (a) drop the last word, (b) first word
/// plus last word, (c) first word only. At most five suggestions.
fn fuzzy_entity_suggestions(entity_id: &str, known_entities: &BTreeSet<String>) -> Vec<String> {
    let Some((domain, name)) = entity_id.split_once('.') else {
        return Vec::new();
    };
    let words: Vec<&str> = name.split('_').filter(|w| !w.is_empty()).collect();
    if words.is_empty() {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    if words.len() > 1 {
        candidates.push(words[..words.len() - 1].join("_"));
    }
    if words.len() > 2 {
        candidates.push(format!("{}_{}", words[0], words[words.len() - 1]));
    }
    candidates.push(words[0].to_string());

    let mut suggestions = Vec::new();
    for candidate in candidates {
        let probe = format!("{domain}.{candidate}");
        if known_entities.contains(&probe) && !suggestions.contains(&probe) {
            suggestions.push(probe);
            if suggestions.len() == 5 {
                break;
            }
        }
    }
    suggestions
}
