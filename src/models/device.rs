use serde::{Deserialize, Serialize};

/// Read-only device metadata from the device registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub integration: String,
    /// 0-100, absent when the registry has no health data for the device.
    #[serde(default)]
    pub health_score: Option<f64>,
    #[serde(default)]
    pub entities: Vec<EntityRef>,
}

impl DeviceRecord {
    /// Healthy enough to anchor an automation on. Unknown health counts as
    /// healthy; only a known-bad score disqualifies.
    pub fn is_healthy(&self) -> bool {
        self.health_score.map_or(true, |h| h >= 70.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_id: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

impl EntityRef {
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub area_id: String,
    #[serde(default)]
    pub name: String,
}
