use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A capability record older than this is stale and must be refreshed on the
/// next pipeline run.
pub const STALE_AFTER_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Easy,
    Medium,
    Advanced,
}

impl Complexity {
    /// Ranking weight: easier features are better automation candidates.
    pub fn weight(self) -> u32 {
        match self {
            Complexity::Easy => 3,
            Complexity::Medium => 2,
            Complexity::Advanced => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Easy => "easy",
            Complexity::Medium => "medium",
            Complexity::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(Complexity::Easy),
            "medium" => Some(Complexity::Medium),
            "advanced" => Some(Complexity::Advanced),
            _ => None,
        }
    }
}

/// The shape of a single exposed capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapabilityKind {
    Binary {
        #[serde(default)]
        value_on: Option<serde_json::Value>,
        #[serde(default)]
        value_off: Option<serde_json::Value>,
    },
    Numeric {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        unit: String,
    },
    Enum {
        values: Vec<String>,
    },
    Composite {
        features: Vec<String>,
    },
}

impl CapabilityKind {
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityKind::Binary { .. } => "binary",
            CapabilityKind::Numeric { .. } => "numeric",
            CapabilityKind::Enum { .. } => "enum",
            CapabilityKind::Composite { .. } => "composite",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    #[serde(flatten)]
    pub kind: CapabilityKind,
    /// Canonical vendor name as it appears in the exposes declaration.
    pub mqtt_name: String,
    pub complexity: Complexity,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySource {
    Bridge,
    Manual,
    Inferred,
}

impl CapabilitySource {
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilitySource::Bridge => "bridge",
            CapabilitySource::Manual => "manual",
            CapabilitySource::Inferred => "inferred",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bridge" => Some(CapabilitySource::Bridge),
            "manual" => Some(CapabilitySource::Manual),
            "inferred" => Some(CapabilitySource::Inferred),
            _ => None,
        }
    }
}

/// Write-through cache entry, one per device model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub device_model: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub description: String,
    pub capabilities: BTreeMap<String, CapabilityDescriptor>,
    /// Original payload, retained for audit.
    pub raw_exposes: serde_json::Value,
    pub source: CapabilitySource,
    pub last_updated: DateTime<Utc>,
}

impl CapabilityRecord {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_updated > Duration::days(STALE_AFTER_DAYS)
    }
}
