//! Pipeline Scheduler (C4, spec §4.4) — "the hard part". Owns one
//! `PipelinePool` for one virtual model: selection, circuit breaking
//! (delegated to each `Pipeline`'s own `CircuitBreaker`), retry, health
//! checks, and backpressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rcc_provider_core::{Classification, EventHub, LoadBalancingStrategy, RetryPolicy};
use rcc_transform::normalized::NormalizedResponse;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::pipeline::Pipeline;
use crate::request::RequestContext;
use crate::upstream_client::UpstreamClient;

/// The set of pipelines serving one virtual model (spec §3 `PipelinePool`).
pub struct PipelinePool {
    pub virtual_model_id: String,
    pub pipelines: Vec<Arc<Pipeline>>,
    pub strategy: LoadBalancingStrategy,
    pub retry: RetryPolicy,
    rr_cursor: AtomicUsize,
}

impl PipelinePool {
    pub fn new(
        virtual_model_id: String,
        pipelines: Vec<Arc<Pipeline>>,
        strategy: LoadBalancingStrategy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            virtual_model_id,
            pipelines,
            strategy,
            retry,
            rr_cursor: AtomicUsize::new(0),
        }
    }

    fn eligible(&self, exclude: &[String]) -> Vec<&Arc<Pipeline>> {
        self.pipelines
            .iter()
            .filter(|p| p.is_selectable() && !exclude.iter().any(|id| id == &p.id))
            .collect()
    }

    /// Picks one pipeline under the pool's strategy, skipping pipelines
    /// already tried for this request. `None` means
    /// `ErrNoAvailableTargets` once propagated by the scheduler.
    pub fn select(&self, exclude: &[String]) -> Option<Arc<Pipeline>> {
        let candidates = self.eligible(exclude);
        if candidates.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            LoadBalancingStrategy::Failover => candidates
                .iter()
                .find(|p| p.is_selectable())
                .copied()
                .unwrap_or(candidates[0]),
            LoadBalancingStrategy::RoundRobin => {
                let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
                candidates[idx % candidates.len()]
            }
            LoadBalancingStrategy::LeastLoaded => candidates
                .iter()
                .min_by_key(|p| p.in_flight())
                .copied()
                .unwrap_or_else(|| {
                    let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
                    candidates[idx % candidates.len()]
                }),
            LoadBalancingStrategy::Weighted => {
                let total: f64 = candidates
                    .iter()
                    .map(|p| p.weight() as f64 * p.health.score().max(0.01))
                    .sum();
                let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
                let mut pick = (idx as f64 % 1000.0 / 1000.0) * total.max(0.000_001);
                let mut chosen = candidates[0];
                for p in &candidates {
                    let weight = p.weight() as f64 * p.health.score().max(0.01);
                    if pick < weight {
                        chosen = p;
                        break;
                    }
                    pick -= weight;
                }
                chosen
            }
        };

        Some(chosen.clone())
    }
}

/// What a scheduler run returns when every attempt fails; the manager maps
/// this onto the §7 error table.
#[derive(Debug, Clone)]
pub enum SchedulerOutcome {
    Success(NormalizedResponse),
    NoAvailableTargets,
    AllTargetsFailed {
        last_category: Classification,
        last_provider_id: Option<String>,
        detected_limit: Option<u64>,
    },
    Overloaded,
    Timeout,
    Cancelled,
}

/// Owns one `PipelinePool` plus the concurrency cap and health-check loop
/// for one virtual model. Reload replaces the whole scheduler behind an
/// `Arc` swap in the manager's map; an in-flight request keeps its own
/// `Arc<PipelineScheduler>` clone alive until it finishes, so it always
/// runs to completion against the pool it started with (spec invariant 7).
pub struct PipelineScheduler {
    pub pool: PipelinePool,
    max_in_flight: Arc<Semaphore>,
    capacity: usize,
    client: Arc<dyn UpstreamClient>,
    events: EventHub,
}

impl PipelineScheduler {
    pub fn new(
        pool: PipelinePool,
        client: Arc<dyn UpstreamClient>,
        events: EventHub,
        max_in_flight: usize,
    ) -> Arc<Self> {
        let capacity = max_in_flight.max(1);
        let scheduler = Arc::new(Self {
            pool,
            max_in_flight: Arc::new(Semaphore::new(capacity)),
            capacity,
            client,
            events,
        });
        scheduler.clone().spawn_health_checks();
        scheduler
    }

    pub fn virtual_model_id(&self) -> &str {
        &self.pool.virtual_model_id
    }

    /// Exported for `GET /status` (spec §4.8 aggregated metrics).
    pub fn summary(&self) -> SchedulerSummary {
        SchedulerSummary {
            virtual_model_id: self.pool.virtual_model_id.clone(),
            in_flight: self.in_flight_estimate(),
            pipelines: self
                .pool
                .pipelines
                .iter()
                .map(|p| PipelineSummary {
                    id: p.id.clone(),
                    enabled: p.enabled(),
                    breaker_state: format!("{:?}", p.breaker.state()),
                    health_score: p.health.score(),
                    in_flight: p.in_flight(),
                })
                .collect(),
        }
    }

    /// Advisory only: permits can be acquired/released between this read
    /// and its use, so callers (status reporting, shutdown drain) must
    /// treat it as a snapshot, not a lock.
    pub fn in_flight_estimate(&self) -> usize {
        self.capacity
            .saturating_sub(self.max_in_flight.available_permits())
    }

    /// Drives one request to completion: selection, invocation, retry,
    /// backoff, and cancellation — up to `retry.max_attempts` adapter
    /// invocations total (spec invariant 5).
    pub async fn dispatch(&self, ctx: &mut RequestContext) -> SchedulerOutcome {
        if self.pool.pipelines.is_empty() {
            return SchedulerOutcome::NoAvailableTargets;
        }

        let mut last_category: Option<Classification> = None;
        let mut last_provider_id: Option<String> = None;
        let mut detected_limit: Option<u64> = None;

        for attempt in 1..=self.pool.retry.max_attempts {
            if ctx.is_cancelled() {
                return SchedulerOutcome::Cancelled;
            }
            if ctx.is_expired() {
                return SchedulerOutcome::Timeout;
            }

            let permit = tokio::select! {
                permit = self.max_in_flight.acquire() => permit,
                _ = tokio::time::sleep(ctx.remaining()) => {
                    return SchedulerOutcome::Overloaded;
                }
                _ = ctx.cancellation.cancelled() => {
                    return SchedulerOutcome::Cancelled;
                }
            };
            let Ok(permit) = permit else {
                return SchedulerOutcome::Overloaded;
            };

            let Some(pipeline) = self.pool.select(&ctx.tried_pipelines) else {
                drop(permit);
                return match last_category {
                    Some(category) => SchedulerOutcome::AllTargetsFailed {
                        last_category: category,
                        last_provider_id,
                        detected_limit,
                    },
                    None => SchedulerOutcome::NoAvailableTargets,
                };
            };
            ctx.mark_tried(&pipeline.id);

            let deadline = ctx.remaining().min(Duration::from_secs(300));
            let attempt_result = tokio::select! {
                result = pipeline.execute(
                    &ctx.request_id,
                    attempt,
                    &ctx.request,
                    self.client.as_ref(),
                    &self.events,
                    deadline,
                ) => result,
                _ = ctx.cancellation.cancelled() => {
                    drop(permit);
                    return SchedulerOutcome::Cancelled;
                }
            };
            drop(permit);

            last_category = Some(attempt_result.classification);
            last_provider_id = Some(pipeline.provider_config.id.clone());
            detected_limit = attempt_result
                .error_message
                .as_deref()
                .and_then(rcc_provider_core::classification::extract_token_limit);

            if attempt_result.classification == Classification::Success {
                let Some(response) = attempt_result.response else {
                    warn!(request_id = %ctx.request_id, "success classification with no body");
                    continue;
                };
                return SchedulerOutcome::Success(response);
            }

            if !attempt_result.classification.is_retryable() {
                return SchedulerOutcome::AllTargetsFailed {
                    last_category: attempt_result.classification,
                    last_provider_id,
                    detected_limit,
                };
            }

            if attempt < self.pool.retry.max_attempts {
                let backoff = backoff_for(&self.pool.retry, attempt);
                debug!(
                    request_id = %ctx.request_id,
                    attempt,
                    ?backoff,
                    "retrying after retryable failure"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = ctx.cancellation.cancelled() => return SchedulerOutcome::Cancelled,
                }
            }
        }

        match last_category {
            Some(category) => SchedulerOutcome::AllTargetsFailed {
                last_category: category,
                last_provider_id,
                detected_limit,
            },
            None => SchedulerOutcome::NoAvailableTargets,
        }
    }

    /// Periodic minimal "ping" probes against `open` pipelines (spec §4.4
    /// Health checks): a successful probe short-circuits the cooldown to
    /// `half_open` without waiting out the full window.
    fn spawn_health_checks(self: Arc<Self>) {
        let weak = Arc::downgrade(&self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let Some(scheduler) = weak.upgrade() else {
                    return;
                };
                for pipeline in &scheduler.pool.pipelines {
                    if pipeline.breaker.state() != crate::breaker::BreakerState::Open {
                        continue;
                    }
                    let classification = pipeline.probe(scheduler.client.as_ref()).await;
                    debug!(
                        pipeline = %pipeline.id,
                        ?classification,
                        "health-check probe against open breaker"
                    );
                }
            }
        });
    }
}

fn backoff_for(retry: &RetryPolicy, attempt: u32) -> Duration {
    let base = retry.base_delay_ms as f64;
    let scaled = base * retry.backoff_multiplier.powi(attempt as i32 - 1);
    Duration::from_millis(scaled.min(retry.max_delay_ms as f64) as u64)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineSummary {
    pub id: String,
    pub enabled: bool,
    pub breaker_state: String,
    pub health_score: f64,
    pub in_flight: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerSummary {
    pub virtual_model_id: String,
    pub in_flight: usize,
    pub pipelines: Vec<PipelineSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use rcc_provider_core::{CircuitBreakerConfig, CredentialPool, EventHub};
    use rcc_transform::normalized::{NormalizedMessage, NormalizedRequest, NormalizedRole};
    use tokio_util::sync::CancellationToken;

    use crate::breaker::CircuitBreaker;
    use crate::pipeline::Pipeline;
    use crate::request::RequestContext;
    use crate::test_support::{credentials_with_one_key, provider_config, target, FakeAdapter, Script, ScriptedClient};

    fn make_pipeline(
        provider_id: &str,
        credentials: Arc<CredentialPool>,
        breaker_threshold: u32,
    ) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            "default".to_string(),
            target(provider_id, "model-a"),
            provider_config(provider_id),
            Arc::new(FakeAdapter),
            credentials,
            CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: breaker_threshold,
                cooldown_secs: 300,
            }),
        ))
    }

    fn request_ctx(request_id: &str) -> RequestContext {
        RequestContext::new(
            request_id.to_string(),
            "default".to_string(),
            NormalizedRequest {
                model: "default".to_string(),
                messages: vec![NormalizedMessage::text(NormalizedRole::User, "ping")],
                system: None,
                max_tokens: Some(16),
                temperature: None,
                top_p: None,
                stop_sequences: None,
                stream: false,
                tools: None,
                tool_choice: None,
            },
            Duration::from_secs(5),
            CancellationToken::new(),
        )
    }

    async fn scheduler_with(
        pipelines: Vec<Arc<Pipeline>>,
        strategy: LoadBalancingStrategy,
        retry: RetryPolicy,
        client: Arc<dyn UpstreamClient>,
    ) -> Arc<PipelineScheduler> {
        let pool = PipelinePool::new("default".to_string(), pipelines, strategy, retry);
        PipelineScheduler::new(pool, client, EventHub::new(16), 50)
    }

    #[tokio::test]
    async fn retries_a_different_pipeline_on_rate_limit_then_succeeds() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "a").await;
        credentials_with_one_key(&credentials, "b").await;
        let a = make_pipeline("a", credentials.clone(), 5);
        let b = make_pipeline("b", credentials.clone(), 5);

        let client = Arc::new(ScriptedClient::new());
        client.program("a", vec![Script::Http { status: 429, body: "rate limited" }]);
        client.program("b", vec![Script::Http { status: 200, body: "pong" }]);

        let scheduler = scheduler_with(
            vec![a.clone(), b.clone()],
            LoadBalancingStrategy::RoundRobin,
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
            },
            client.clone(),
        )
        .await;

        let mut ctx = request_ctx("req-1");
        let outcome = scheduler.dispatch(&mut ctx).await;

        assert!(matches!(outcome, SchedulerOutcome::Success(_)));
        assert_eq!(client.calls_for("a"), 1);
        assert_eq!(client.calls_for("b"), 1);
        assert_eq!(a.breaker.state(), crate::breaker::BreakerState::Closed);
        assert_eq!(b.breaker.state(), crate::breaker::BreakerState::Closed);
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_pool_reports_no_available_targets() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "a").await;
        let a = make_pipeline("a", credentials.clone(), 5);

        let client = Arc::new(ScriptedClient::new());
        client.program("a", vec![Script::Http { status: 500, body: "boom" }]);

        let scheduler = scheduler_with(
            vec![a.clone()],
            LoadBalancingStrategy::Failover,
            RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 1.0,
            },
            client.clone(),
        )
        .await;

        for i in 0..5 {
            let mut ctx = request_ctx(&format!("req-{i}"));
            let outcome = scheduler.dispatch(&mut ctx).await;
            assert!(matches!(outcome, SchedulerOutcome::AllTargetsFailed { .. }));
        }
        assert_eq!(a.breaker.state(), crate::breaker::BreakerState::Open);

        let mut ctx = request_ctx("req-sixth");
        let outcome = scheduler.dispatch(&mut ctx).await;
        assert!(matches!(outcome, SchedulerOutcome::NoAvailableTargets));
    }

    #[tokio::test]
    async fn empty_pool_returns_no_available_targets_without_invoking_adapter() {
        let client = Arc::new(ScriptedClient::new());
        let scheduler = scheduler_with(
            vec![],
            LoadBalancingStrategy::RoundRobin,
            RetryPolicy::default(),
            client.clone(),
        )
        .await;

        let mut ctx = request_ctx("req-1");
        let outcome = scheduler.dispatch(&mut ctx).await;
        assert!(matches!(outcome, SchedulerOutcome::NoAvailableTargets));
        assert_eq!(client.total_calls(), 0);
    }

    #[tokio::test]
    async fn round_robin_selects_every_pipeline_once_before_repeating() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        for id in ["a", "b", "c"] {
            credentials_with_one_key(&credentials, id).await;
        }
        let pipelines: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| make_pipeline(id, credentials.clone(), 5))
            .collect();

        let pool = PipelinePool::new(
            "default".to_string(),
            pipelines.clone(),
            LoadBalancingStrategy::RoundRobin,
            RetryPolicy::default(),
        );

        let mut seen = HashSet::new();
        for _ in 0..pipelines.len() {
            let chosen = pool.select(&[]).expect("pool is non-empty");
            seen.insert(chosen.id.clone());
        }
        assert_eq!(seen.len(), pipelines.len());
    }

    #[tokio::test]
    async fn never_exceeds_max_attempts_adapter_invocations_even_with_a_larger_pool() {
        // Five pipelines all fail, but max_attempts caps the number of
        // distinct-pipeline retries at 3 regardless of how many more
        // untried pipelines remain (spec invariant 5).
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        let mut pipelines = Vec::new();
        let client = Arc::new(ScriptedClient::new());
        for id in ["a", "b", "c", "d", "e"] {
            credentials_with_one_key(&credentials, id).await;
            pipelines.push(make_pipeline(id, credentials.clone(), 100));
            client.program(id, vec![Script::Http { status: 503, body: "boom" }]);
        }

        let scheduler = scheduler_with(
            pipelines,
            LoadBalancingStrategy::RoundRobin,
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 1.0,
            },
            client.clone(),
        )
        .await;

        let mut ctx = request_ctx("req-1");
        let outcome = scheduler.dispatch(&mut ctx).await;
        assert!(matches!(outcome, SchedulerOutcome::AllTargetsFailed { .. }));
        assert_eq!(client.total_calls(), 3);
    }

    #[tokio::test]
    async fn single_pipeline_pool_exhausts_after_one_retryable_failure() {
        // With only one pipeline in the pool, a retryable failure still
        // ends the request immediately: there is no *different* pipeline
        // left to retry against, regardless of max_attempts.
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "a").await;
        let a = make_pipeline("a", credentials.clone(), 100);

        let client = Arc::new(ScriptedClient::new());
        client.program("a", vec![Script::Http { status: 503, body: "boom" }]);

        let scheduler = scheduler_with(
            vec![a],
            LoadBalancingStrategy::Failover,
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 1.0,
            },
            client.clone(),
        )
        .await;

        let mut ctx = request_ctx("req-1");
        let outcome = scheduler.dispatch(&mut ctx).await;
        assert!(matches!(outcome, SchedulerOutcome::AllTargetsFailed { .. }));
        assert_eq!(client.total_calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_request_stops_before_any_adapter_invocation() {
        let client = Arc::new(ScriptedClient::new());
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "a").await;
        let a = make_pipeline("a", credentials.clone(), 5);

        let scheduler = scheduler_with(
            vec![a],
            LoadBalancingStrategy::Failover,
            RetryPolicy::default(),
            client.clone(),
        )
        .await;

        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let mut ctx = RequestContext::new(
            "req-1".to_string(),
            "default".to_string(),
            NormalizedRequest {
                model: "default".to_string(),
                messages: vec![NormalizedMessage::text(NormalizedRole::User, "ping")],
                system: None,
                max_tokens: Some(16),
                temperature: None,
                top_p: None,
                stop_sequences: None,
                stream: false,
                tools: None,
                tool_choice: None,
            },
            Duration::from_secs(5),
            cancellation,
        );

        let outcome = scheduler.dispatch(&mut ctx).await;
        assert!(matches!(outcome, SchedulerOutcome::Cancelled));
        assert_eq!(client.total_calls(), 0);
    }
}
