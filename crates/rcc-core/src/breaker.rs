//! Per-pipeline circuit breaker (spec §4.4): `closed -> open` on consecutive
//! breaker-counting failures, `open -> half_open` after a cooldown (or an
//! early successful health probe), `half_open -> closed`/`open` on the next
//! outcome.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rcc_provider_core::{CircuitBreakerConfig, Classification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Thread-safe per-pipeline breaker. Transitions happen under a short lock;
/// no IO is ever performed while holding it (spec §5 Shared resources).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether this pipeline may currently be selected. An `open` breaker
    /// past its cooldown self-transitions to `half_open` and becomes
    /// selectable for exactly the probing request.
    pub fn is_available(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooldown = Duration::from_secs(self.config.cooldown_secs);
                if inner.opened_at.is_none_or(|t| t.elapsed() >= cooldown) {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Short-circuits an `open` breaker's cooldown after a successful
    /// out-of-band health probe (spec §4.4 Health checks).
    pub fn probe_succeeded(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == BreakerState::Open {
            inner.state = BreakerState::HalfOpen;
        }
    }

    /// Records one real attempt's classification and applies the state
    /// transition table. Token-limit and malformed outcomes never reach
    /// here (spec: "do not count toward circuit opening").
    pub fn record(&self, classification: Classification) {
        if !classification.counts_toward_circuit_breaker() && classification != Classification::Success
        {
            return;
        }
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                if classification == Classification::Success {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                } else {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Closed => {
                if classification == Classification::Success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = BreakerState::Open;
                        inner.opened_at = Some(Instant::now());
                    }
                }
            }
            BreakerState::Open => {
                // A real request should never land here (is_available would
                // have reported false), but a racing probe could. Treat as
                // half-open's table.
                if classification == Classification::Success {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_secs: 300,
        })
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let b = breaker(5);
        for _ in 0..4 {
            b.record(Classification::ServerError);
            assert_eq!(b.state(), BreakerState::Closed);
        }
        b.record(Classification::ServerError);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.is_available());
    }

    #[test]
    fn token_limit_never_opens_breaker() {
        let b = breaker(1);
        for _ in 0..10 {
            b.record(Classification::TokenLimitExceeded);
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_closes_on_success_reopens_on_failure() {
        let b = breaker(1);
        b.record(Classification::ServerError);
        assert_eq!(b.state(), BreakerState::Open);
        b.probe_succeeded();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record(Classification::Success);
        assert_eq!(b.state(), BreakerState::Closed);

        b.record(Classification::ServerError);
        b.probe_succeeded();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record(Classification::ServerError);
        assert_eq!(b.state(), BreakerState::Open);
    }
}
