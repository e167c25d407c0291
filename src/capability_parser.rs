use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::capability::{
    CapabilityDescriptor, CapabilityKind, CapabilityRecord, CapabilitySource, Complexity,
};

/// Parses vendor-neutral "exposes" declarations into structured capability
/// descriptors. Works across manufacturers because the declaration shapes,
/// not the vendors, drive the mapping. Unknown shapes are skipped and
/// counted, never fatal.
pub struct CapabilityParser;

#[derive(Debug, Default)]
pub struct ParsedCapabilities {
    pub capabilities: BTreeMap<String, CapabilityDescriptor>,
    pub skipped: usize,
}

impl CapabilityParser {
    pub fn parse_exposes(&self, exposes: &[Value]) -> ParsedCapabilities {
        let mut out = ParsedCapabilities::default();

        for expose in exposes {
            let Some(expose_type) = expose.get("type").and_then(Value::as_str) else {
                tracing::debug!("expose without a type field, skipping");
                out.skipped += 1;
                continue;
            };

            match expose_type {
                "light" => {
                    let (name, descriptor) = self.parse_composite(expose, "light_control", "light");
                    out.capabilities.insert(name, descriptor);
                }
                "switch" => {
                    out.capabilities.insert(
                        "switch_control".to_string(),
                        CapabilityDescriptor {
                            kind: CapabilityKind::Binary {
                                value_on: None,
                                value_off: None,
                            },
                            mqtt_name: "switch".to_string(),
                            complexity: Complexity::Easy,
                            description: description_of(expose, "Basic switch on/off"),
                        },
                    );
                }
                "climate" => {
                    let (name, mut descriptor) =
                        self.parse_composite(expose, "climate_control", "climate");
                    descriptor.complexity = Complexity::Medium;
                    descriptor.description =
                        description_of(expose, "Temperature and climate control");
                    out.capabilities.insert(name, descriptor);
                }
                "enum" => match self.parse_enum(expose) {
                    Some((name, descriptor)) => {
                        out.capabilities.insert(name, descriptor);
                    }
                    None => out.skipped += 1,
                },
                "numeric" => match self.parse_numeric(expose) {
                    Some((name, descriptor)) => {
                        out.capabilities.insert(name, descriptor);
                    }
                    None => out.skipped += 1,
                },
                "binary" => match self.parse_binary(expose) {
                    Some((name, descriptor)) => {
                        out.capabilities.insert(name, descriptor);
                    }
                    None => out.skipped += 1,
                },
                other => {
                    tracing::debug!("unknown expose type '{other}', skipping");
                    out.skipped += 1;
                }
            }
        }

        out
    }

    /// Build a full write-through cache record from one device's exposes.
    pub fn parse_record(
        &self,
        model: &str,
        manufacturer: &str,
        description: &str,
        exposes: &[Value],
        source: CapabilitySource,
        now: DateTime<Utc>,
    ) -> CapabilityRecord {
        let parsed = self.parse_exposes(exposes);
        if parsed.skipped > 0 {
            tracing::warn!(
                "model {model}: skipped {} unparseable expose declarations",
                parsed.skipped
            );
        }
        CapabilityRecord {
            device_model: model.to_string(),
            manufacturer: manufacturer.to_string(),
            description: description.to_string(),
            capabilities: parsed.capabilities,
            raw_exposes: Value::Array(exposes.to_vec()),
            source,
            last_updated: now,
        }
    }

    fn parse_composite(
        &self,
        expose: &Value,
        friendly_name: &str,
        mqtt_name: &str,
    ) -> (String, CapabilityDescriptor) {
        let features: Vec<String> = expose
            .get("features")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|f| f.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // Colour-capable lights take more configuration than plain dimmers.
        let complexity = if features.iter().any(|f| f == "color_xy" || f == "color_hs") {
            Complexity::Medium
        } else {
            Complexity::Easy
        };

        (
            friendly_name.to_string(),
            CapabilityDescriptor {
                kind: CapabilityKind::Composite { features },
                mqtt_name: mqtt_name.to_string(),
                complexity,
                description: description_of(expose, "Basic light control"),
            },
        )
    }

    fn parse_enum(&self, expose: &Value) -> Option<(String, CapabilityDescriptor)> {
        let mqtt_name = expose.get("name").and_then(Value::as_str)?;
        let values: Vec<String> = expose
            .get("values")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some((
            map_friendly_name(mqtt_name),
            CapabilityDescriptor {
                kind: CapabilityKind::Enum { values },
                mqtt_name: mqtt_name.to_string(),
                complexity: assess_complexity(mqtt_name),
                description: description_of(expose, ""),
            },
        ))
    }

    fn parse_numeric(&self, expose: &Value) -> Option<(String, CapabilityDescriptor)> {
        let mqtt_name = expose.get("name").and_then(Value::as_str)?;
        Some((
            map_friendly_name(mqtt_name),
            CapabilityDescriptor {
                kind: CapabilityKind::Numeric {
                    min: expose.get("value_min").and_then(Value::as_f64),
                    max: expose.get("value_max").and_then(Value::as_f64),
                    unit: expose
                        .get("unit")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                },
                mqtt_name: mqtt_name.to_string(),
                complexity: assess_complexity(mqtt_name),
                description: description_of(expose, ""),
            },
        ))
    }

    fn parse_binary(&self, expose: &Value) -> Option<(String, CapabilityDescriptor)> {
        let mqtt_name = expose.get("name").and_then(Value::as_str)?;
        Some((
            map_friendly_name(mqtt_name),
            CapabilityDescriptor {
                kind: CapabilityKind::Binary {
                    value_on: expose.get("value_on").cloned(),
                    value_off: expose.get("value_off").cloned(),
                },
                mqtt_name: mqtt_name.to_string(),
                complexity: Complexity::Easy,
                description: description_of(expose, ""),
            },
        ))
    }
}

fn description_of(expose: &Value, default: &str) -> String {
    expose
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Vendor name to friendly name, applied in order: explicit lookup table,
/// camelCase to snake_case, hyphen/space normalisation, collapse repeated
/// underscores.
pub fn map_friendly_name(mqtt_name: &str) -> String {
    const LOOKUP: &[(&str, &str)] = &[
        ("smartBulbMode", "smart_bulb_mode"),
        ("autoTimerOff", "auto_off_timer"),
        ("led_effect", "led_notifications"),
        ("ledEffect", "led_notifications"),
        ("ledWhenOn", "led_when_on"),
        ("ledWhenOff", "led_when_off"),
        ("LEDWhenOn", "led_when_on"),
        ("LEDWhenOff", "led_when_off"),
        ("powerOnBehavior", "power_on_behavior"),
        ("localProtection", "local_protection"),
        ("remoteProtection", "remote_protection"),
    ];
    if let Some((_, friendly)) = LOOKUP.iter().find(|(vendor, _)| *vendor == mqtt_name) {
        return friendly.to_string();
    }

    let camel_boundary = regex::Regex::new("([a-z0-9])([A-Z])").unwrap();
    let snake = camel_boundary
        .replace_all(mqtt_name, "${1}_${2}")
        .to_lowercase();
    let separators = regex::Regex::new("[ -]+").unwrap();
    let normalised = separators.replace_all(&snake, "_");
    regex::Regex::new("_+")
        .unwrap()
        .replace_all(&normalised, "_")
        .into_owned()
}

/// Complexity inferred by keyword in the vendor name.
pub fn assess_complexity(mqtt_name: &str) -> Complexity {
    const ADVANCED: &[&str] = &[
        "effect",
        "transition",
        "calibration",
        "sensitivity",
        "scene",
        "advanced",
    ];
    const MEDIUM: &[&str] = &["timer", "delay", "threshold", "duration", "interval", "timeout"];

    let lower = mqtt_name.to_lowercase();
    if ADVANCED.iter().any(|kw| lower.contains(kw)) {
        Complexity::Advanced
    } else if MEDIUM.iter().any(|kw| lower.contains(kw)) {
        Complexity::Medium
    } else {
        Complexity::Easy
    }
}
