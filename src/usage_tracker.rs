use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Cost model for the configured LLM provider, dollars per token.
const INPUT_TOKEN_COST_USD: f64 = 0.000_000_15;
const OUTPUT_TOKEN_COST_USD: f64 = 0.000_000_60;

/// In-memory token and call accounting for LLM usage.
///
/// Updates are atomic so concurrent per-suggestion calls can record without
/// coordination; snapshot reads return a value copy.
#[derive(Debug, Default)]
pub struct UsageTracker {
    calls: AtomicU64,
    failed_calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub calls: u64,
    pub failed_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub est_cost_usd: f64,
}

impl UsageTracker {
    pub fn record_call(&self, input_tokens: u64, output_tokens: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(output_tokens, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);
        UsageSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            input_tokens,
            output_tokens,
            est_cost_usd: estimate_cost(input_tokens, output_tokens),
        }
    }
}

pub fn estimate_cost(input_tokens: u64, output_tokens: u64) -> f64 {
    input_tokens as f64 * INPUT_TOKEN_COST_USD + output_tokens as f64 * OUTPUT_TOKEN_COST_USD
}

impl UsageSnapshot {
    /// Usage accrued between `earlier` and `self`, for per-run accounting.
    pub fn since(&self, earlier: &UsageSnapshot) -> UsageSnapshot {
        let input_tokens = self.input_tokens.saturating_sub(earlier.input_tokens);
        let output_tokens = self.output_tokens.saturating_sub(earlier.output_tokens);
        UsageSnapshot {
            calls: self.calls.saturating_sub(earlier.calls),
            failed_calls: self.failed_calls.saturating_sub(earlier.failed_calls),
            input_tokens,
            output_tokens,
            est_cost_usd: estimate_cost(input_tokens, output_tokens),
        }
    }

    pub fn as_day(&self, date: NaiveDate) -> LlmUsageDay {
        LlmUsageDay {
            date,
            calls: self.calls as i64,
            failed_calls: self.failed_calls as i64,
            input_tokens: self.input_tokens as i64,
            output_tokens: self.output_tokens as i64,
            est_cost_usd: self.est_cost_usd,
        }
    }
}

/// A persisted per-day usage rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmUsageDay {
    pub date: NaiveDate,
    pub calls: i64,
    pub failed_calls: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub est_cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_calls() {
        let tracker = UsageTracker::default();
        tracker.record_call(100, 40);
        tracker.record_call(50, 10);
        tracker.record_failure();

        let snap = tracker.snapshot();
        assert_eq!(snap.calls, 3);
        assert_eq!(snap.failed_calls, 1);
        assert_eq!(snap.input_tokens, 150);
        assert_eq!(snap.output_tokens, 50);
        assert!(snap.est_cost_usd > 0.0);
    }

    #[test]
    fn since_yields_per_run_delta() {
        let tracker = UsageTracker::default();
        tracker.record_call(100, 40);
        let before = tracker.snapshot();
        tracker.record_call(200, 80);
        let delta = tracker.snapshot().since(&before);
        assert_eq!(delta.calls, 1);
        assert_eq!(delta.input_tokens, 200);
        assert_eq!(delta.output_tokens, 80);
    }

    #[test]
    fn cost_uses_published_per_token_rates() {
        let cost = estimate_cost(1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
    }
}
