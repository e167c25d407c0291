use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    Pattern,
    Feature,
    Synergy,
    Community,
}

impl SuggestionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionSource::Pattern => "pattern",
            SuggestionSource::Feature => "feature",
            SuggestionSource::Synergy => "synergy",
            SuggestionSource::Community => "community",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pattern" => Some(SuggestionSource::Pattern),
            "feature" => Some(SuggestionSource::Feature),
            "synergy" => Some(SuggestionSource::Synergy),
            "community" => Some(SuggestionSource::Community),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
    Deployed,
}

impl SuggestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Approved => "approved",
            SuggestionStatus::Rejected => "rejected",
            SuggestionStatus::Deployed => "deployed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SuggestionStatus::Pending),
            "approved" => Some(SuggestionStatus::Approved),
            "rejected" => Some(SuggestionStatus::Rejected),
            "deployed" => Some(SuggestionStatus::Deployed),
            _ => None,
        }
    }

    /// Legal status transitions: pending -> approved|rejected,
    /// approved -> deployed. Deployed and rejected are terminal.
    pub fn can_transition(self, to: SuggestionStatus) -> bool {
        matches!(
            (self, to),
            (SuggestionStatus::Pending, SuggestionStatus::Approved)
                | (SuggestionStatus::Pending, SuggestionStatus::Rejected)
                | (SuggestionStatus::Approved, SuggestionStatus::Deployed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Energy,
    Comfort,
    Security,
    Convenience,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Energy => "energy",
            Category::Comfort => "comfort",
            Category::Security => "security",
            Category::Convenience => "convenience",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "energy" => Some(Category::Energy),
            "comfort" => Some(Category::Comfort),
            "security" => Some(Category::Security),
            "convenience" => Some(Category::Convenience),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn weight(self) -> u32 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// A proposed automation the user may accept, reject, or edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub source: SuggestionSource,
    pub title: String,
    pub description: String,
    pub rationale: String,
    /// YAML automation specification; materialised on approval, null before.
    pub automation_spec: Option<String>,
    pub confidence: f64,
    pub category: Category,
    pub priority: Priority,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pattern_ref: Option<String>,
    #[serde(default)]
    pub synergy_ref: Option<String>,
    #[serde(default)]
    pub validated_entities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Approved,
    Rejected,
    Modified,
}

impl FeedbackAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackAction::Approved => "approved",
            FeedbackAction::Rejected => "rejected",
            FeedbackAction::Modified => "modified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(FeedbackAction::Approved),
            "rejected" => Some(FeedbackAction::Rejected),
            "modified" => Some(FeedbackAction::Modified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub suggestion_id: String,
    pub action: FeedbackAction,
    #[serde(default)]
    pub free_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Request payloads ──

#[derive(Debug, Deserialize)]
pub struct UpdateSuggestionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub automation_spec: Option<String>,
}

impl UpdateSuggestionRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.rationale.is_none()
            && self.automation_spec.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    #[serde(default)]
    pub free_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchStatusRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub free_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_permits_only_forward_moves() {
        use SuggestionStatus::*;
        assert!(Pending.can_transition(Approved));
        assert!(Pending.can_transition(Rejected));
        assert!(Approved.can_transition(Deployed));
        assert!(!Approved.can_transition(Rejected));
        assert!(!Deployed.can_transition(Pending));
        assert!(!Rejected.can_transition(Approved));
    }

    #[test]
    fn enums_round_trip_through_strings() {
        for s in ["pending", "approved", "rejected", "deployed"] {
            assert_eq!(SuggestionStatus::parse(s).unwrap().as_str(), s);
        }
        for s in ["pattern", "feature", "synergy", "community"] {
            assert_eq!(SuggestionSource::parse(s).unwrap().as_str(), s);
        }
        assert!(SuggestionStatus::parse("bogus").is_none());
    }
}
