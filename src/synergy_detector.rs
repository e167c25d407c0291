use std::collections::BTreeSet;

use chrono::Utc;

use crate::models::automation::AutomationRule;
use crate::models::capability::Complexity;
use crate::models::device::DeviceRecord;
use crate::models::event::Event;
use crate::models::synergy::{SynergyOpportunity, SynergyType};

/// Productive trigger/action role combinations with their base affinity.
const DOMAIN_AFFINITY: &[(&str, &str, f64, &str, Complexity)] = &[
    ("motion", "light", 0.8, "motion_triggers_light", Complexity::Easy),
    ("occupancy", "light", 0.75, "occupancy_triggers_light", Complexity::Easy),
    ("door", "light", 0.7, "door_triggers_light", Complexity::Easy),
    ("door", "lock", 0.75, "door_lock_coordination", Complexity::Medium),
    ("motion", "climate", 0.55, "presence_drives_climate", Complexity::Medium),
    ("temperature", "climate", 0.7, "temperature_drives_climate", Complexity::Medium),
    ("humidity", "fan", 0.65, "humidity_drives_fan", Complexity::Easy),
];

const HEALTHY_BONUS: f64 = 0.1;
const CO_LOCATION_BONUS: f64 = 0.1;

/// Finds unconnected device pairs whose domain combination is productive,
/// plus contextual opportunities (weather/energy signals present in the
/// event stream but referenced by no automation).
pub struct SynergyDetector {
    pub min_confidence: f64,
    pub same_area_required: bool,
}

impl Default for SynergyDetector {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            same_area_required: false,
        }
    }
}

impl SynergyDetector {
    pub fn detect_device_pairs(
        &self,
        devices: &[DeviceRecord],
        automations: &[AutomationRule],
    ) -> Vec<SynergyOpportunity> {
        let existing_pairs: BTreeSet<(String, String)> = automations
            .iter()
            .flat_map(|a| a.entity_pairs())
            .collect();

        let mut synergies = Vec::new();
        for trigger_device in devices {
            for action_device in devices {
                if trigger_device.device_id == action_device.device_id {
                    continue;
                }
                if self.same_area_required
                    && (trigger_device.area_id.is_none()
                        || trigger_device.area_id != action_device.area_id)
                {
                    continue;
                }

                for trigger_entity in &trigger_device.entities {
                    let Some(trigger_role) = classify_entity(&trigger_entity.entity_id) else {
                        continue;
                    };
                    for action_entity in &action_device.entities {
                        let Some(action_role) = classify_entity(&action_entity.entity_id) else {
                            continue;
                        };
                        let Some((_, _, affinity, relationship, complexity)) = DOMAIN_AFFINITY
                            .iter()
                            .find(|(t, a, ..)| *t == trigger_role && *a == action_role)
                        else {
                            continue;
                        };
                        if *affinity < self.min_confidence {
                            continue;
                        }
                        // Already automated: suppress.
                        if existing_pairs.contains(&(
                            trigger_entity.entity_id.clone(),
                            action_entity.entity_id.clone(),
                        )) {
                            tracing::debug!(
                                "suppressing synergy {} -> {}: automation exists",
                                trigger_entity.entity_id,
                                action_entity.entity_id,
                            );
                            continue;
                        }

                        let co_located = trigger_device.area_id.is_some()
                            && trigger_device.area_id == action_device.area_id;
                        let mut impact_score = *affinity;
                        if trigger_device.is_healthy() && action_device.is_healthy() {
                            impact_score += HEALTHY_BONUS;
                        }
                        if co_located {
                            impact_score += CO_LOCATION_BONUS;
                        }

                        synergies.push(SynergyOpportunity {
                            synergy_id: format!(
                                "syn-pair-{}+{}",
                                trigger_entity.entity_id, action_entity.entity_id
                            ),
                            synergy_type: SynergyType::DevicePair,
                            devices: vec![
                                trigger_device.device_id.clone(),
                                action_device.device_id.clone(),
                            ],
                            relationship: (*relationship).to_string(),
                            area: if co_located {
                                trigger_device.area_id.clone()
                            } else {
                                None
                            },
                            impact_score: impact_score.min(1.0),
                            complexity: *complexity,
                            confidence: *affinity,
                            metadata: serde_json::json!({
                                "trigger_entity": trigger_entity.entity_id,
                                "action_entity": action_entity.entity_id,
                            }),
                            created_at: Utc::now(),
                        });
                    }
                }
            }
        }

        synergies.sort_by(|a, b| {
            b.impact_score
                .partial_cmp(&a.impact_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.synergy_id.cmp(&b.synergy_id))
        });
        tracing::info!("detected {} device-pair synergies", synergies.len());
        synergies
    }

    /// Weather and energy signals that fire events but are referenced by no
    /// automation are untapped context.
    pub fn detect_context_opportunities(
        &self,
        events: &[Event],
        automations: &[AutomationRule],
    ) -> Vec<SynergyOpportunity> {
        let referenced: BTreeSet<&str> = automations
            .iter()
            .flat_map(|a| {
                a.trigger_entities
                    .iter()
                    .chain(a.action_entities.iter())
                    .map(String::as_str)
            })
            .collect();

        let mut seen = BTreeSet::new();
        let mut opportunities = Vec::new();
        for event in events {
            if !seen.insert(event.entity_id.as_str()) {
                continue;
            }
            if referenced.contains(event.entity_id.as_str()) {
                continue;
            }
            let Some((synergy_type, relationship)) = classify_context(&event.entity_id) else {
                continue;
            };

            opportunities.push(SynergyOpportunity {
                synergy_id: format!("syn-context-{}", event.entity_id),
                synergy_type,
                devices: vec![event.entity_id.clone()],
                relationship: relationship.to_string(),
                area: None,
                impact_score: 0.6,
                complexity: Complexity::Medium,
                confidence: 0.6,
                metadata: serde_json::json!({ "signal_entity": event.entity_id }),
                created_at: Utc::now(),
            });
        }

        opportunities.sort_by(|a, b| a.synergy_id.cmp(&b.synergy_id));
        tracing::info!("detected {} contextual opportunities", opportunities.len());
        opportunities
    }
}

/// The automation role an entity can play, derived from its domain and name.
fn classify_entity(entity_id: &str) -> Option<&'static str> {
    let domain = entity_id.split('.').next().unwrap_or("");
    let name = entity_id.split('.').nth(1).unwrap_or("").to_lowercase();
    match domain {
        "light" => Some("light"),
        "lock" => Some("lock"),
        "climate" => Some("climate"),
        "fan" => Some("fan"),
        "binary_sensor" => {
            if name.contains("motion") {
                Some("motion")
            } else if name.contains("occupancy") || name.contains("presence") {
                Some("occupancy")
            } else if name.contains("door") || name.contains("contact") {
                Some("door")
            } else {
                None
            }
        }
        "sensor" => {
            if name.contains("temperature") {
                Some("temperature")
            } else if name.contains("humidity") {
                Some("humidity")
            } else {
                None
            }
        }
        _ => None,
    }
}

fn classify_context(entity_id: &str) -> Option<(SynergyType, &'static str)> {
    let domain = entity_id.split('.').next().unwrap_or("");
    let name = entity_id.split('.').nth(1).unwrap_or("").to_lowercase();
    if domain == "weather" || (domain == "sensor" && name.contains("weather")) {
        return Some((SynergyType::WeatherContext, "weather_aware_automation"));
    }
    if domain == "sensor" && (name.contains("energy") || name.contains("power")) {
        return Some((SynergyType::EnergyContext, "energy_aware_automation"));
    }
    None
}
