use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single state-change event from the external event store.
///
/// Events are immutable and ordered by `timestamp`. The `domain` is not
/// stored on the wire; it is the `entity_id` prefix up to the first `.`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or("")
    }
}

/// Optional narrowing filter for event fetches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl EventFilter {
    pub fn is_empty(&self) -> bool {
        self.entity_id.is_none() && self.device_id.is_none() && self.domain.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_is_prefix_up_to_first_dot() {
        let e = Event {
            timestamp: Utc::now(),
            entity_id: "light.kitchen_ceiling".to_string(),
            device_id: String::new(),
            state: "on".to_string(),
            attributes: Default::default(),
        };
        assert_eq!(e.domain(), "light");
    }

    #[test]
    fn domain_of_dotless_id_is_whole_id() {
        let e = Event {
            timestamp: Utc::now(),
            entity_id: "weird".to_string(),
            device_id: String::new(),
            state: String::new(),
            attributes: Default::default(),
        };
        assert_eq!(e.domain(), "weird");
    }
}
