use std::collections::HashMap;

use chrono::{Duration, Utc};
use rand::SeedableRng;

use crate::models::event::Event;
use crate::models::pattern::{CoOccurrenceDaily, Pattern, PatternKind};

/// Sampling kicks in above this many events.
const SAMPLE_THRESHOLD: usize = 50_000;
/// Older events are uniform-sampled down to this many.
const SAMPLE_TARGET: usize = 20_000;
/// The most recent window kept verbatim when sampling.
const SAMPLE_KEEP_DAYS: i64 = 7;
/// Fixed seed so runs over identical inputs produce identical patterns.
const SAMPLE_SEED: u64 = 42;

/// Mines pairs of entities that fire together inside a forward time window,
/// association-rule style: support against all events, confidence against
/// the rarer entity of the pair.
pub struct CoOccurrenceDetector {
    pub window: Duration,
    pub min_support: u32,
    pub min_confidence: f64,
}

impl Default for CoOccurrenceDetector {
    fn default() -> Self {
        Self {
            window: Duration::minutes(5),
            min_support: 5,
            min_confidence: 0.7,
        }
    }
}

#[derive(Default)]
struct PairStat {
    count: u32,
    sum_delta_seconds: f64,
}

impl CoOccurrenceDetector {
    pub fn new(window: Duration, min_support: u32, min_confidence: f64) -> Self {
        Self {
            window,
            min_support,
            min_confidence,
        }
    }

    pub fn detect(&self, events: &[Event]) -> Vec<Pattern> {
        if events.is_empty() {
            tracing::warn!("co-occurrence detector: no events to analyse");
            return Vec::new();
        }

        let mut events = self.maybe_sample(events);
        events.sort_by_key(|e| e.timestamp);
        let total_events = events.len();

        let mut entity_counts: HashMap<&str, u32> = HashMap::new();
        for event in &events {
            *entity_counts.entry(event.entity_id.as_str()).or_default() += 1;
        }

        // Forward-window two-pointer pass over the sorted slice.
        let mut pairs: HashMap<(String, String), PairStat> = HashMap::new();
        for (i, a) in events.iter().enumerate() {
            let window_end = a.timestamp + self.window;
            for b in events[i + 1..].iter() {
                if b.timestamp > window_end {
                    break;
                }
                if b.entity_id == a.entity_id {
                    continue;
                }
                let key = if a.entity_id < b.entity_id {
                    (a.entity_id.clone(), b.entity_id.clone())
                } else {
                    (b.entity_id.clone(), a.entity_id.clone())
                };
                let stat = pairs.entry(key).or_default();
                stat.count += 1;
                stat.sum_delta_seconds +=
                    (b.timestamp - a.timestamp).num_milliseconds() as f64 / 1000.0;
            }
        }

        let mut patterns = Vec::new();
        for ((entity_a, entity_b), stat) in pairs {
            if stat.count < self.min_support {
                continue;
            }
            let count_a = entity_counts[entity_a.as_str()];
            let count_b = entity_counts[entity_b.as_str()];
            let confidence = (stat.count as f64 / count_a.min(count_b) as f64).min(1.0);
            if confidence < self.min_confidence {
                continue;
            }
            let support = stat.count as f64 / total_events as f64;
            let avg_delta_seconds = stat.sum_delta_seconds / stat.count as f64;

            tracing::info!(
                "co-occurrence pattern: {entity_a} + {entity_b} \
                 ({} times, {:.0}% confidence, avg_delta={avg_delta_seconds:.1}s)",
                stat.count,
                confidence * 100.0,
            );
            patterns.push(Pattern {
                pattern_id: format!("coc-{entity_a}+{entity_b}"),
                kind: PatternKind::CoOccurrence {
                    entity_a,
                    entity_b,
                    window_seconds: self.window.num_seconds() as u32,
                    support,
                    avg_delta_seconds,
                },
                confidence,
                occurrences: stat.count,
                created_at: Utc::now(),
            });
        }

        // HashMap iteration order is arbitrary; sort for deterministic output.
        patterns.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        tracing::info!("detected {} co-occurrence patterns", patterns.len());
        patterns
    }

    /// Above the threshold, keep the most recent seven days verbatim and
    /// uniform-sample older events down to the target with a fixed seed.
    fn maybe_sample(&self, events: &[Event]) -> Vec<Event> {
        if events.len() <= SAMPLE_THRESHOLD {
            return events.to_vec();
        }
        let Some(max_ts) = events.iter().map(|e| e.timestamp).max() else {
            return events.to_vec();
        };
        let cutoff = max_ts - Duration::days(SAMPLE_KEEP_DAYS);

        let (recent, older): (Vec<&Event>, Vec<&Event>) =
            events.iter().partition(|e| e.timestamp > cutoff);

        let mut sampled: Vec<Event> = recent.into_iter().cloned().collect();
        if older.len() <= SAMPLE_TARGET {
            sampled.extend(older.into_iter().cloned());
        } else {
            let mut rng = rand::rngs::StdRng::seed_from_u64(SAMPLE_SEED);
            let mut picked: Vec<usize> =
                rand::seq::index::sample(&mut rng, older.len(), SAMPLE_TARGET).into_vec();
            picked.sort_unstable();
            sampled.extend(picked.into_iter().map(|i| older[i].clone()));
        }
        tracing::info!(
            "sampled {} of {} events (recent kept verbatim, older seeded uniform)",
            sampled.len(),
            events.len(),
        );
        sampled
    }

    pub fn daily_aggregates(
        &self,
        events: &[Event],
        patterns: &[Pattern],
    ) -> Vec<CoOccurrenceDaily> {
        let Some(date) = events.iter().map(|e| e.timestamp.date_naive()).min() else {
            return Vec::new();
        };
        patterns
            .iter()
            .filter_map(|p| match &p.kind {
                PatternKind::CoOccurrence {
                    entity_a,
                    entity_b,
                    window_seconds,
                    support,
                    avg_delta_seconds,
                } => Some(CoOccurrenceDaily {
                    date,
                    combined_id: format!("{entity_a}+{entity_b}"),
                    entity_a: entity_a.clone(),
                    entity_b: entity_b.clone(),
                    occurrences: p.occurrences,
                    confidence: p.confidence,
                    support: *support,
                    avg_delta_seconds: *avg_delta_seconds,
                    window_seconds: *window_seconds,
                }),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_at(entity: &str, day: u32, hour: u32, minute: u32, second: u32) -> Event {
        Event {
            timestamp: Utc
                .with_ymd_and_hms(2025, 10, day, hour, minute, second)
                .unwrap(),
            entity_id: entity.to_string(),
            device_id: format!("dev-{entity}"),
            state: "on".to_string(),
            attributes: Default::default(),
        }
    }

    /// Device B fires 10 s after device A on 20 days; A and B each fire 25
    /// times in total. Pair count 20, support 20/50, confidence 20/25.
    fn paired_fixture() -> Vec<Event> {
        let mut events = Vec::new();
        for day in 1..=20 {
            events.push(event_at("switch.a", day, 18, 0, 0));
            events.push(event_at("light.b", day, 18, 0, 10));
        }
        // 5 solo firings each, far apart so they witness no pairs.
        for day in 21..=25 {
            events.push(event_at("switch.a", day, 6, 0, 0));
            events.push(event_at("light.b", day, 23, 0, 0));
        }
        events
    }

    #[test]
    fn pair_support_and_confidence_match_the_rarer_entity_denominator() {
        let patterns = CoOccurrenceDetector::default().detect(&paired_fixture());
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        match &p.kind {
            PatternKind::CoOccurrence {
                entity_a,
                entity_b,
                support,
                avg_delta_seconds,
                window_seconds,
            } => {
                assert_eq!(entity_a, "light.b");
                assert_eq!(entity_b, "switch.a");
                assert!(entity_a < entity_b, "pair must be sorted");
                assert!((support - 20.0 / 50.0).abs() < 1e-9);
                assert!((avg_delta_seconds - 10.0).abs() < 1e-9);
                assert_eq!(*window_seconds, 300);
            }
            _ => panic!("wrong kind"),
        }
        assert_eq!(p.occurrences, 20);
        assert!((p.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped_to_one() {
        // b fires twice within the window of every a firing.
        let mut events = Vec::new();
        for day in 1..=10 {
            events.push(event_at("switch.a", day, 12, 0, 0));
            events.push(event_at("light.b", day, 12, 0, 5));
            events.push(event_at("light.b", day, 12, 0, 50));
        }
        let patterns = CoOccurrenceDetector::default().detect(&events);
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].confidence <= 1.0);
        match patterns[0].kind {
            PatternKind::CoOccurrence { support, .. } => assert!(support <= 1.0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn pairs_below_min_support_are_dropped() {
        let mut events = Vec::new();
        for day in 1..=4 {
            events.push(event_at("switch.a", day, 12, 0, 0));
            events.push(event_at("light.b", day, 12, 0, 5));
        }
        assert!(CoOccurrenceDetector::default().detect(&events).is_empty());
    }

    #[test]
    fn events_outside_window_do_not_pair() {
        let mut events = Vec::new();
        for day in 1..=10 {
            events.push(event_at("switch.a", day, 12, 0, 0));
            events.push(event_at("light.b", day, 12, 6, 0));
        }
        assert!(CoOccurrenceDetector::default().detect(&events).is_empty());
    }

    #[test]
    fn sampling_is_deterministic_and_keeps_recent_events() {
        // 60k events over 60 days, far above the sampling threshold.
        let mut events = Vec::new();
        let base = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        for i in 0..60_000u32 {
            events.push(Event {
                timestamp: base + Duration::minutes(i as i64),
                entity_id: format!("sensor.s{}", i % 7),
                device_id: String::new(),
                state: "on".to_string(),
                attributes: Default::default(),
            });
        }

        let detector = CoOccurrenceDetector::default();
        let first = detector.maybe_sample(&events);
        let second = detector.maybe_sample(&events);
        assert_eq!(first.len(), second.len());
        let ts = |v: &[Event]| v.iter().map(|e| e.timestamp).collect::<Vec<_>>();
        assert_eq!(ts(&first), ts(&second), "sampling must be reproducible");

        // Everything in the last 7 days survives verbatim.
        let max_ts = events.last().unwrap().timestamp;
        let cutoff = max_ts - Duration::days(7);
        let recent_in = events.iter().filter(|e| e.timestamp > cutoff).count();
        let recent_out = first.iter().filter(|e| e.timestamp > cutoff).count();
        assert_eq!(recent_in, recent_out);
        assert!(first.len() < events.len());
    }

    #[test]
    fn aggregates_mirror_detected_pairs() {
        let detector = CoOccurrenceDetector::default();
        let events = paired_fixture();
        let patterns = detector.detect(&events);
        let rows = detector.daily_aggregates(&events, &patterns);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].combined_id, "light.b+switch.a");
        assert_eq!(rows[0].occurrences, 20);
        assert_eq!(rows[0].window_seconds, 300);
    }
}
