use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user-visible rule owned by the external orchestrator, reduced to the
/// parts this service reasons about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub trigger_entities: Vec<String>,
    #[serde(default)]
    pub action_entities: Vec<String>,
}

impl AutomationRule {
    pub fn from_config(config: &Value) -> Self {
        let id = config
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let alias = config
            .get("alias")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            id,
            alias,
            trigger_entities: extract_entities(config.get("trigger")),
            action_entities: extract_entities(config.get("action")),
        }
    }

    /// Every (trigger entity, action entity) combination this rule covers.
    /// Used to suppress synergies and flag conflicting deployments.
    pub fn entity_pairs(&self) -> BTreeSet<(String, String)> {
        let mut pairs = BTreeSet::new();
        for t in &self.trigger_entities {
            for a in &self.action_entities {
                pairs.insert((t.clone(), a.clone()));
            }
        }
        pairs
    }
}

/// Collect every `entity_id` mentioned in a trigger or action block. The
/// orchestrator accepts both a single string and a list, and nests targets
/// under `target`, `sequence` and `choose`, so this walks the whole value.
pub fn extract_entities(value: Option<&Value>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(v) = value {
        walk_entities(v, &mut out);
    }
    out.dedup();
    out
}

fn walk_entities(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                walk_entities(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(entity) = map.get("entity_id") {
                push_entity(entity, out);
            }
            for (key, nested) in map {
                if key != "entity_id" {
                    walk_entities(nested, out);
                }
            }
        }
        _ => {}
    }
}

fn push_entity(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if !out.contains(s) {
                out.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                push_entity(item, out);
            }
        }
        _ => {}
    }
}

/// Collect every `service` call name in an action block, including those
/// nested in `sequence` and `choose` branches.
pub fn extract_services(value: Option<&Value>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(v) = value {
        walk_services(v, &mut out);
    }
    out
}

fn walk_services(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                walk_services(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(service)) = map.get("service") {
                if !out.contains(service) {
                    out.push(service.clone());
                }
            }
            for (key, nested) in map {
                if key != "service" {
                    walk_services(nested, out);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Value {
        serde_json::json!({
            "id": "morning_light",
            "alias": "Morning light",
            "trigger": [
                {"platform": "state", "entity_id": "binary_sensor.hall_motion", "to": "on"}
            ],
            "action": [
                {"service": "light.turn_on", "target": {"entity_id": ["light.hall", "light.stairs"]}},
                {"choose": [{"sequence": [{"service": "notify.mobile", "entity_id": "sensor.phone"}]}]}
            ]
        })
    }

    #[test]
    fn extracts_entities_from_nested_blocks() {
        let rule = AutomationRule::from_config(&sample_config());
        assert_eq!(rule.trigger_entities, vec!["binary_sensor.hall_motion"]);
        assert_eq!(
            rule.action_entities,
            vec!["light.hall", "light.stairs", "sensor.phone"]
        );
    }

    #[test]
    fn entity_pairs_cover_the_cross_product() {
        let rule = AutomationRule::from_config(&sample_config());
        let pairs = rule.entity_pairs();
        assert!(pairs.contains(&(
            "binary_sensor.hall_motion".to_string(),
            "light.hall".to_string()
        )));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn extracts_services_from_choose_branches() {
        let config = sample_config();
        let services = extract_services(config.get("action"));
        assert_eq!(services, vec!["light.turn_on", "notify.mobile"]);
    }
}
