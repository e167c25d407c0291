use std::collections::BTreeMap;

use chrono::{Timelike, Utc};

use crate::models::event::Event;
use crate::models::pattern::{Pattern, PatternKind, TimeOfDayDaily};

/// Detects entities that are consistently used at the same time of day by
/// clustering event timestamps projected onto a decimal hour in [0, 24).
///
/// Pure function of (events, parameters): the clustering is seeded from
/// quantiles of the sorted input, so identical inputs always produce
/// identical patterns.
pub struct TimeOfDayDetector {
    pub min_occurrences: u32,
    pub min_confidence: f64,
}

impl Default for TimeOfDayDetector {
    fn default() -> Self {
        Self {
            min_occurrences: 5,
            min_confidence: 0.7,
        }
    }
}

struct Cluster {
    centre: f64,
    members: Vec<f64>,
}

impl TimeOfDayDetector {
    pub fn new(min_occurrences: u32, min_confidence: f64) -> Self {
        Self {
            min_occurrences,
            min_confidence,
        }
    }

    pub fn detect(&self, events: &[Event]) -> Vec<Pattern> {
        if events.is_empty() {
            tracing::warn!("time-of-day detector: no events to analyse");
            return Vec::new();
        }

        // BTreeMap keeps per-entity iteration order stable across runs.
        let mut by_entity: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for event in events {
            let decimal =
                event.timestamp.hour() as f64 + event.timestamp.minute() as f64 / 60.0;
            by_entity.entry(&event.entity_id).or_default().push(decimal);
        }

        let mut patterns = Vec::new();
        for (entity_id, times) in by_entity {
            // Too little data to form a meaningful cluster.
            if times.len() < 5 {
                continue;
            }
            let k = if times.len() <= 10 {
                1
            } else if times.len() <= 20 {
                2
            } else {
                3
            };

            let total = times.len();
            for cluster in kmeans_1d(&times, k) {
                let size = cluster.members.len();
                if (size as u32) < self.min_occurrences {
                    continue;
                }
                let confidence = size as f64 / total as f64;
                if confidence < self.min_confidence {
                    continue;
                }

                let mean: f64 = cluster.members.iter().sum::<f64>() / size as f64;
                let hour = (mean as u8).min(23);
                let minute = (((mean % 1.0) * 60.0) as u8).min(59);
                let std_minutes = if size > 1 {
                    let var = cluster
                        .members
                        .iter()
                        .map(|t| (t - mean).powi(2))
                        .sum::<f64>()
                        / (size - 1) as f64;
                    var.sqrt() * 60.0
                } else {
                    0.0
                };

                patterns.push(Pattern {
                    pattern_id: format!("tod-{entity_id}-{hour:02}:{minute:02}"),
                    kind: PatternKind::TimeOfDay {
                        entity_id: entity_id.to_string(),
                        hour,
                        minute,
                        std_minutes,
                        total_events: total as u32,
                    },
                    confidence,
                    occurrences: size as u32,
                    created_at: Utc::now(),
                });
                tracing::info!(
                    "time-of-day pattern: {entity_id} at {hour:02}:{minute:02} \
                     ({size}/{total} = {confidence:.0}%, std={std_minutes:.1}min)",
                    confidence = confidence * 100.0,
                );
            }
        }

        tracing::info!("detected {} time-of-day patterns", patterns.len());
        patterns
    }

    /// Per-entity daily rollups for the detected patterns: a 24-slot hourly
    /// histogram, the peak hours (top quarter of active hours), and the
    /// frequency/confidence metrics future runs roll forward.
    pub fn daily_aggregates(&self, events: &[Event], patterns: &[Pattern]) -> Vec<TimeOfDayDaily> {
        let Some(date) = events.iter().map(|e| e.timestamp.date_naive()).min() else {
            return Vec::new();
        };

        let mut rows = Vec::new();
        for pattern in patterns {
            let PatternKind::TimeOfDay { entity_id, .. } = &pattern.kind else {
                continue;
            };

            let mut hourly_counts = [0u32; 24];
            for event in events.iter().filter(|e| &e.entity_id == entity_id) {
                hourly_counts[event.timestamp.hour() as usize] += 1;
            }

            let mut hours: Vec<u8> = (0..24).collect();
            hours.sort_by(|a, b| {
                hourly_counts[*b as usize]
                    .cmp(&hourly_counts[*a as usize])
                    .then(a.cmp(b))
            });
            let active = hourly_counts.iter().filter(|c| **c > 0).count();
            let top = (active / 4).max(1);
            let peak_hours: Vec<u8> = hours.into_iter().take(top).collect();

            let total: u32 = hourly_counts.iter().sum();
            let domain = entity_id.split('.').next().unwrap_or("").to_string();
            rows.push(TimeOfDayDaily {
                date,
                entity_id: entity_id.clone(),
                domain,
                hourly_counts,
                peak_hours,
                frequency: total as f64 / 24.0,
                confidence: pattern.confidence,
                occurrences: pattern.occurrences,
            });
        }
        rows
    }
}

/// Ad hoc 1-D k-means: centres start on quantiles of the sorted values and
/// Lloyd iterations run to a fixed point (bounded). Each value goes to the
/// nearest centre; an exact distance tie goes to the lower cluster index.
fn kmeans_1d(values: &[f64], k: usize) -> Vec<Cluster> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut centres: Vec<f64> = (0..k)
        .map(|i| {
            let pos = (2 * i + 1) * sorted.len() / (2 * k);
            sorted[pos.min(sorted.len() - 1)]
        })
        .collect();

    let mut assignment = vec![0usize; values.len()];
    for _ in 0..100 {
        let mut changed = false;
        for (vi, value) in values.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = (value - centres[0]).abs();
            for (ci, centre) in centres.iter().enumerate().skip(1) {
                let dist = (value - centre).abs();
                if dist < best_dist {
                    best = ci;
                    best_dist = dist;
                }
            }
            if assignment[vi] != best {
                assignment[vi] = best;
                changed = true;
            }
        }

        for ci in 0..k {
            let members: Vec<f64> = values
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == ci)
                .map(|(v, _)| *v)
                .collect();
            if !members.is_empty() {
                centres[ci] = members.iter().sum::<f64>() / members.len() as f64;
            }
        }

        if !changed {
            break;
        }
    }

    (0..k)
        .map(|ci| Cluster {
            centre: centres[ci],
            members: values
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == ci)
                .map(|(v, _)| *v)
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_at(entity: &str, day: u32, hour: u32, minute: u32) -> Event {
        Event {
            timestamp: Utc
                .with_ymd_and_hms(2025, 10, day, hour, minute, 0)
                .unwrap(),
            entity_id: entity.to_string(),
            device_id: format!("dev-{entity}"),
            state: "on".to_string(),
            attributes: Default::default(),
        }
    }

    #[test]
    fn daily_0705_toggle_yields_single_high_confidence_pattern() {
        let events: Vec<Event> = (1..=30)
            .map(|day| event_at("light.bedroom", day, 7, 5))
            .collect();

        let patterns = TimeOfDayDetector::default().detect(&events);
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        match &p.kind {
            PatternKind::TimeOfDay {
                entity_id,
                hour,
                minute,
                total_events,
                ..
            } => {
                assert_eq!(entity_id, "light.bedroom");
                assert_eq!(*hour, 7);
                assert_eq!(*minute, 5);
                assert_eq!(*total_events, 30);
            }
            _ => panic!("wrong kind"),
        }
        assert!(p.occurrences >= 29);
        assert!((p.confidence - 1.0).abs() < 1e-9);
        assert_eq!(
            p.confidence,
            p.occurrences as f64 / 30.0,
            "confidence must equal occurrences / total_events"
        );
    }

    #[test]
    fn entities_below_five_events_are_skipped() {
        let events: Vec<Event> = (1..=4).map(|day| event_at("light.rare", day, 9, 0)).collect();
        assert!(TimeOfDayDetector::default().detect(&events).is_empty());
    }

    #[test]
    fn scattered_events_produce_no_confident_pattern() {
        // 12 events spread evenly over the day: two clusters, each well below
        // the 0.7 confidence floor.
        let events: Vec<Event> = (0..12)
            .map(|i| event_at("switch.random", i + 1, (i * 2) % 24, 0))
            .collect();
        assert!(TimeOfDayDetector::default().detect(&events).is_empty());
    }

    #[test]
    fn two_tight_clusters_both_emit_with_lower_threshold() {
        // 8 morning + 8 evening events; k=2 splits them cleanly.
        let mut events = Vec::new();
        for day in 1..=8 {
            events.push(event_at("light.porch", day, 7, 0));
            events.push(event_at("light.porch", day, 19, 0));
        }
        let detector = TimeOfDayDetector::new(5, 0.4);
        let patterns = detector.detect(&events);
        assert_eq!(patterns.len(), 2);
        let hours: Vec<u8> = patterns
            .iter()
            .map(|p| match p.kind {
                PatternKind::TimeOfDay { hour, .. } => hour,
                _ => unreachable!(),
            })
            .collect();
        assert!(hours.contains(&7) && hours.contains(&19));
        for p in &patterns {
            assert!((p.confidence - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn detection_is_deterministic() {
        let events: Vec<Event> = (1..=25)
            .flat_map(|day| {
                vec![
                    event_at("light.a", day, 7, day % 10),
                    event_at("light.a", day, 22, (day * 3) % 30),
                ]
            })
            .collect();
        let detector = TimeOfDayDetector::default();
        let first = detector.detect(&events);
        let second = detector.detect(&events);
        let ids = |ps: &[Pattern]| {
            ps.iter()
                .map(|p| (p.pattern_id.clone(), p.occurrences, p.confidence))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn aggregates_carry_hourly_histogram_and_peaks() {
        let events: Vec<Event> = (1..=30)
            .map(|day| event_at("light.bedroom", day, 7, 5))
            .collect();
        let detector = TimeOfDayDetector::default();
        let patterns = detector.detect(&events);
        let rows = detector.daily_aggregates(&events, &patterns);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.domain, "light");
        assert_eq!(row.hourly_counts[7], 30);
        assert_eq!(row.hourly_counts.iter().sum::<u32>(), 30);
        assert_eq!(row.peak_hours, vec![7]);
        assert!((row.frequency - 30.0 / 24.0).abs() < 1e-9);
    }

    #[test]
    fn pattern_bounds_hold() {
        let events: Vec<Event> = (1..=30)
            .map(|day| event_at("light.late", day, 23, 59))
            .collect();
        let patterns = TimeOfDayDetector::default().detect(&events);
        for p in &patterns {
            match p.kind {
                PatternKind::TimeOfDay {
                    hour,
                    minute,
                    total_events,
                    ..
                } => {
                    assert!(hour <= 23);
                    assert!(minute <= 59);
                    assert!(p.occurrences <= total_events);
                }
                _ => unreachable!(),
            }
        }
    }
}
