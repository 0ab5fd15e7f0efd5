use tokio::time::{Duration, Instant};

/// Per-slot quota accounting: a token bucket for requests-per-minute and a
/// rolling daily counter for requests-per-day, plus the live in-flight
/// count.
#[derive(Debug, Clone)]
pub struct Quota {
    rpm_limit: Option<f64>,
    rpm_tokens: f64,
    rpm_last_refill: Instant,
    rpd_limit: Option<u64>,
    rpd_count: u64,
    rpd_window_start: Instant,
    pub concurrent_in_flight: u32,
}

impl Quota {
    pub fn new(rpm_limit: Option<u32>, rpd_limit: Option<u32>) -> Self {
        let now = Instant::now();
        Self {
            rpm_limit: rpm_limit.map(f64::from),
            rpm_tokens: rpm_limit.map(f64::from).unwrap_or(0.0),
            rpm_last_refill: now,
            rpd_limit: rpd_limit.map(u64::from),
            rpd_count: 0,
            rpd_window_start: now,
            concurrent_in_flight: 0,
        }
    }

    fn refill(&mut self, now: Instant) {
        let Some(limit) = self.rpm_limit else {
            return;
        };
        let elapsed = now.saturating_duration_since(self.rpm_last_refill);
        let refilled = limit * (elapsed.as_secs_f64() / 60.0);
        if refilled > 0.0 {
            self.rpm_tokens = (self.rpm_tokens + refilled).min(limit);
            self.rpm_last_refill = now;
        }
        if now.saturating_duration_since(self.rpd_window_start) >= Duration::from_secs(86_400) {
            self.rpd_count = 0;
            self.rpd_window_start = now;
        }
    }

    /// Whether a request may be admitted right now; does not mutate state.
    pub fn has_capacity(&mut self, now: Instant) -> bool {
        self.refill(now);
        let rpm_ok = self.rpm_limit.is_none_or(|_| self.rpm_tokens >= 1.0);
        let rpd_ok = self.rpd_limit.is_none_or(|limit| self.rpd_count < limit);
        rpm_ok && rpd_ok
    }

    /// Consumes one unit of quota for an admitted request.
    pub fn consume(&mut self, now: Instant) {
        self.refill(now);
        if self.rpm_limit.is_some() {
            self.rpm_tokens = (self.rpm_tokens - 1.0).max(0.0);
        }
        self.rpd_count += 1;
        self.concurrent_in_flight += 1;
    }

    pub fn release(&mut self) {
        self.concurrent_in_flight = self.concurrent_in_flight.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_when_rpm_bucket_is_empty() {
        let mut quota = Quota::new(Some(1), None);
        let now = Instant::now();
        assert!(quota.has_capacity(now));
        quota.consume(now);
        assert!(!quota.has_capacity(now));
    }

    #[test]
    fn unlimited_quota_always_has_capacity() {
        let mut quota = Quota::new(None, None);
        let now = Instant::now();
        assert!(quota.has_capacity(now));
        quota.consume(now);
        assert!(quota.has_capacity(now));
    }
}
