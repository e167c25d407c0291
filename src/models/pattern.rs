use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A repeatable regularity discovered by one of the detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: String,
    #[serde(flatten)]
    pub kind: PatternKind,
    pub confidence: f64,
    pub occurrences: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pattern_type", rename_all = "snake_case")]
pub enum PatternKind {
    TimeOfDay {
        entity_id: String,
        hour: u8,
        minute: u8,
        std_minutes: f64,
        total_events: u32,
    },
    CoOccurrence {
        /// Sorted lexicographically with `entity_b` so the pair is unordered.
        entity_a: String,
        entity_b: String,
        window_seconds: u32,
        support: f64,
        avg_delta_seconds: f64,
    },
}

impl Pattern {
    pub fn pattern_type(&self) -> &'static str {
        match self.kind {
            PatternKind::TimeOfDay { .. } => "time_of_day",
            PatternKind::CoOccurrence { .. } => "co_occurrence",
        }
    }

    /// The storage subject: entity id, or combined pair id for co-occurrence.
    pub fn subject(&self) -> String {
        match &self.kind {
            PatternKind::TimeOfDay { entity_id, .. } => entity_id.clone(),
            PatternKind::CoOccurrence {
                entity_a, entity_b, ..
            } => format!("{entity_a}+{entity_b}"),
        }
    }

    /// Entities this pattern talks about.
    pub fn entities(&self) -> Vec<&str> {
        match &self.kind {
            PatternKind::TimeOfDay { entity_id, .. } => vec![entity_id.as_str()],
            PatternKind::CoOccurrence {
                entity_a, entity_b, ..
            } => vec![entity_a.as_str(), entity_b.as_str()],
        }
    }
}

/// Summary statistics over a batch of patterns, used by the stats endpoints
/// and the on-demand detect responses.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PatternSummary {
    pub total_patterns: usize,
    pub unique_subjects: usize,
    pub avg_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub avg_occurrences: f64,
    pub confidence_distribution: ConfidenceBuckets,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ConfidenceBuckets {
    #[serde(rename = "70-80%")]
    pub b70: usize,
    #[serde(rename = "80-90%")]
    pub b80: usize,
    #[serde(rename = "90-100%")]
    pub b90: usize,
}

impl PatternSummary {
    pub fn from_patterns(patterns: &[Pattern]) -> Self {
        if patterns.is_empty() {
            return Self::default();
        }
        let mut subjects: Vec<String> = patterns.iter().map(|p| p.subject()).collect();
        subjects.sort();
        subjects.dedup();

        let confidences: Vec<f64> = patterns.iter().map(|p| p.confidence).collect();
        let mut buckets = ConfidenceBuckets::default();
        for c in &confidences {
            if (0.7..0.8).contains(c) {
                buckets.b70 += 1;
            } else if (0.8..0.9).contains(c) {
                buckets.b80 += 1;
            } else if *c >= 0.9 {
                buckets.b90 += 1;
            }
        }

        Self {
            total_patterns: patterns.len(),
            unique_subjects: subjects.len(),
            avg_confidence: confidences.iter().sum::<f64>() / confidences.len() as f64,
            min_confidence: confidences.iter().cloned().fold(f64::INFINITY, f64::min),
            max_confidence: confidences.iter().cloned().fold(0.0, f64::max),
            avg_occurrences: patterns.iter().map(|p| p.occurrences as f64).sum::<f64>()
                / patterns.len() as f64,
            confidence_distribution: buckets,
        }
    }
}

/// Per-day, per-entity rollup written by the time-of-day detector so future
/// runs can extend the horizon without rescanning raw events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOfDayDaily {
    pub date: NaiveDate,
    pub entity_id: String,
    pub domain: String,
    pub hourly_counts: [u32; 24],
    pub peak_hours: Vec<u8>,
    pub frequency: f64,
    pub confidence: f64,
    pub occurrences: u32,
}

/// Per-day rollup for a co-occurring entity pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoOccurrenceDaily {
    pub date: NaiveDate,
    pub combined_id: String,
    pub entity_a: String,
    pub entity_b: String,
    pub occurrences: u32,
    pub confidence: f64,
    pub support: f64,
    pub avg_delta_seconds: f64,
    pub window_seconds: u32,
}
