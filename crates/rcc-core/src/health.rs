//! Per-pipeline health score (spec §4.4): an exponentially-weighted moving
//! average over the last N outcomes, mapping `success -> 1`,
//! `retryable_failure -> 0.3`, `non_retryable_failure -> 0`. Feeds weighted
//! selection and is exported as a metric.

use std::sync::atomic::{AtomicU64, Ordering};

use rcc_provider_core::Classification;

const DEFAULT_WINDOW: u32 = 20;

/// `alpha = 2 / (N + 1)`, the standard EWMA smoothing constant for a window
/// of size N.
fn alpha(window: u32) -> f64 {
    2.0 / (window as f64 + 1.0)
}

fn outcome_value(classification: Classification) -> f64 {
    match classification {
        Classification::Success => 1.0,
        c if c.is_retryable() => 0.3,
        _ => 0.0,
    }
}

/// Lock-free: stored as the score's bit pattern in an `AtomicU64` so
/// `record`/`score` never block a concurrent selection decision.
pub struct HealthTracker {
    bits: AtomicU64,
    alpha: f64,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: u32) -> Self {
        Self {
            bits: AtomicU64::new(1.0f64.to_bits()),
            alpha: alpha(window),
        }
    }

    pub fn score(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn record(&self, classification: Classification) {
        let value = outcome_value(classification);
        loop {
            let current_bits = self.bits.load(Ordering::Relaxed);
            let current = f64::from_bits(current_bits);
            let updated = current + self.alpha * (value - current);
            if self
                .bits
                .compare_exchange_weak(
                    current_bits,
                    updated.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_full_health() {
        let h = HealthTracker::new();
        assert_eq!(h.score(), 1.0);
    }

    #[test]
    fn drops_toward_zero_on_repeated_non_retryable_failure() {
        let h = HealthTracker::new();
        for _ in 0..50 {
            h.record(Classification::AuthFailure);
        }
        assert!(h.score() < 0.05, "score={}", h.score());
    }

    #[test]
    fn recovers_toward_one_on_repeated_success() {
        let h = HealthTracker::with_window(20);
        for _ in 0..50 {
            h.record(Classification::ServerError);
        }
        for _ in 0..50 {
            h.record(Classification::Success);
        }
        assert!(h.score() > 0.95, "score={}", h.score());
    }
}
