use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capability::Complexity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Medium,
    Low,
}

impl Impact {
    pub fn weight(self) -> u32 {
        match self {
            Impact::High => 3,
            Impact::Medium => 2,
            Impact::Low => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Impact::High => "high",
            Impact::Medium => "medium",
            Impact::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Impact::High),
            "medium" => Some(Impact::Medium),
            "low" => Some(Impact::Low),
            _ => None,
        }
    }
}

/// An unused capability of a specific device, ranked for suggestion value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureOpportunity {
    pub device_id: String,
    pub device_name: String,
    pub manufacturer: String,
    pub model: String,
    pub feature_name: String,
    /// Same taxonomy as the capability descriptor: binary, numeric, enum,
    /// composite.
    pub feature_kind: String,
    pub complexity: Complexity,
    pub impact: Impact,
    /// impact weight x complexity weight; 9 is the best possible.
    pub priority_score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynergyType {
    DevicePair,
    WeatherContext,
    EnergyContext,
    EventContext,
}

impl SynergyType {
    pub fn as_str(self) -> &'static str {
        match self {
            SynergyType::DevicePair => "device_pair",
            SynergyType::WeatherContext => "weather_context",
            SynergyType::EnergyContext => "energy_context",
            SynergyType::EventContext => "event_context",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "device_pair" => Some(SynergyType::DevicePair),
            "weather_context" => Some(SynergyType::WeatherContext),
            "energy_context" => Some(SynergyType::EnergyContext),
            "event_context" => Some(SynergyType::EventContext),
            _ => None,
        }
    }
}

/// A plausible but not-yet-implemented cross-device automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynergyOpportunity {
    pub synergy_id: String,
    pub synergy_type: SynergyType,
    pub devices: Vec<String>,
    pub relationship: String,
    #[serde(default)]
    pub area: Option<String>,
    pub impact_score: f64,
    pub complexity: Complexity,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Summary used by `/api/synergies/stats`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SynergyStats {
    pub total: usize,
    pub by_type: std::collections::BTreeMap<String, usize>,
    pub avg_impact_score: f64,
    pub avg_confidence: f64,
}

impl SynergyStats {
    pub fn from_synergies(synergies: &[SynergyOpportunity]) -> Self {
        if synergies.is_empty() {
            return Self::default();
        }
        let mut by_type = std::collections::BTreeMap::new();
        for s in synergies {
            *by_type.entry(s.synergy_type.as_str().to_string()).or_insert(0) += 1;
        }
        Self {
            total: synergies.len(),
            by_type,
            avg_impact_score: synergies.iter().map(|s| s.impact_score).sum::<f64>()
                / synergies.len() as f64,
            avg_confidence: synergies.iter().map(|s| s.confidence).sum::<f64>()
                / synergies.len() as f64,
        }
    }
}
