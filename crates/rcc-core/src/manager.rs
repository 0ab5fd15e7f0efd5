//! Virtual Model Scheduler Manager (C5, spec §4.5): the registry of one
//! `PipelineScheduler` per virtual model, the single entry point
//! `rcc-router` calls through, and the seam where a config reload swaps
//! pools without any reader ever observing a half-installed map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rcc_provider_core::trace::RequestOutcome;
use rcc_transform::normalized::NormalizedResponse;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CoreError;
use crate::request::RequestContext;
use crate::scheduler::{PipelineScheduler, SchedulerOutcome, SchedulerSummary};
use crate::tracker::Tracker;

/// Owns the live `virtual_model_id -> scheduler` map. A request holds its
/// own `Arc<PipelineScheduler>` clone for its whole lifetime, so a reload
/// that replaces the map never disturbs work already in flight (spec
/// invariant 7: "no request observes a scheduler swap mid-flight").
pub struct Manager {
    schedulers: ArcSwap<HashMap<String, Arc<PipelineScheduler>>>,
    tracker: Tracker,
    /// Root of the cancellation tree (spec §5 cancellation trigger
    /// "(iii) manager shutdown"). Every request's token is a
    /// [`CancellationToken::child_token`] of this one, so cancelling it here
    /// cancels every currently live request in one call — no separate
    /// registry of per-request tokens to maintain and prune as requests
    /// complete.
    shutdown_signal: CancellationToken,
}

impl Manager {
    pub fn new(schedulers: HashMap<String, Arc<PipelineScheduler>>, tracker: Tracker) -> Self {
        Self {
            schedulers: ArcSwap::from_pointee(schedulers),
            tracker,
            shutdown_signal: CancellationToken::new(),
        }
    }

    pub fn empty(tracker: Tracker) -> Self {
        Self::new(HashMap::new(), tracker)
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// A fresh cancellation token for one inbound request: cancelled
    /// directly by the northbound handler on connection close (spec §5
    /// trigger (i)), or transitively the moment [`Manager::shutdown`] fires
    /// (trigger (iii)). The caller still layers its own deadline (trigger
    /// (ii)) on top via `RequestContext::remaining`.
    pub fn request_cancellation_token(&self) -> CancellationToken {
        self.shutdown_signal.child_token()
    }

    /// Atomically replaces the entire scheduler map (spec §4.5
    /// `InstallPools`). Old schedulers are dropped from the map but any
    /// `Arc` clone a request is still holding keeps running to completion.
    pub fn install(&self, schedulers: HashMap<String, Arc<PipelineScheduler>>) {
        info!(count = schedulers.len(), "installing new scheduler map");
        self.schedulers.store(Arc::new(schedulers));
    }

    pub fn list_virtual_models(&self) -> Vec<String> {
        self.schedulers.load().keys().cloned().collect()
    }

    pub fn status(&self) -> Vec<SchedulerSummary> {
        self.schedulers
            .load()
            .values()
            .map(|s| s.summary())
            .collect()
    }

    fn lookup(&self, virtual_model_id: &str) -> Option<Arc<PipelineScheduler>> {
        self.schedulers.load().get(virtual_model_id).cloned()
    }

    /// Routes one request to its virtual model's scheduler and drives it to
    /// completion (spec §4.5 `Route`).
    pub async fn route(
        &self,
        mut ctx: RequestContext,
    ) -> Result<NormalizedResponse, CoreError> {
        let request_id = ctx.request_id.clone();
        let virtual_model_id = ctx.virtual_model_id.clone();

        let Some(scheduler) = self.lookup(&virtual_model_id) else {
            return Err(CoreError::UnknownVirtualModel {
                request_id,
                virtual_model_id,
            });
        };

        let outcome = scheduler.dispatch(&mut ctx).await;

        let trace_outcome = match &outcome {
            SchedulerOutcome::Success(_) => RequestOutcome::Success,
            SchedulerOutcome::NoAvailableTargets => RequestOutcome::NoAvailableTargets,
            SchedulerOutcome::AllTargetsFailed { last_category, .. } => {
                match last_category {
                    rcc_provider_core::Classification::AuthFailure => {
                        RequestOutcome::AuthExhausted
                    }
                    _ => RequestOutcome::AllTargetsFailed,
                }
            }
            SchedulerOutcome::Overloaded => RequestOutcome::Overloaded,
            SchedulerOutcome::Timeout => RequestOutcome::AllTargetsFailed,
            SchedulerOutcome::Cancelled => RequestOutcome::Cancelled,
        };
        self.tracker
            .close_request(&request_id, &virtual_model_id, trace_outcome)
            .await;

        match outcome {
            SchedulerOutcome::Success(response) => Ok(response),
            SchedulerOutcome::NoAvailableTargets => Err(CoreError::NoAvailableTargets {
                request_id,
                virtual_model_id,
            }),
            SchedulerOutcome::AllTargetsFailed {
                last_category,
                last_provider_id,
                detected_limit,
            } => {
                if last_category == rcc_provider_core::Classification::TokenLimitExceeded {
                    Err(CoreError::TokenLimitExceeded {
                        request_id,
                        detected_limit,
                    })
                } else if last_category == rcc_provider_core::Classification::AuthFailure {
                    Err(CoreError::AuthExhausted {
                        request_id,
                        provider_id: last_provider_id.unwrap_or(virtual_model_id),
                    })
                } else {
                    Err(CoreError::AllTargetsFailed {
                        request_id,
                        last_category,
                    })
                }
            }
            SchedulerOutcome::Overloaded => Err(CoreError::Overloaded { request_id }),
            SchedulerOutcome::Timeout => Err(CoreError::UpstreamTimeout { request_id }),
            SchedulerOutcome::Cancelled => Err(CoreError::Cancelled { request_id }),
        }
    }

    /// Waits up to `deadline` for every scheduler's in-flight work to drain
    /// before the process exits (spec §6 graceful shutdown). Cancels every
    /// live request's token up front so `PipelineScheduler::dispatch` stops
    /// retrying and returns `Cancelled` instead of running out the clock.
    pub async fn shutdown(&self, deadline: Duration) {
        self.shutdown_signal.cancel();

        let schedulers: Vec<Arc<PipelineScheduler>> =
            self.schedulers.load().values().cloned().collect();
        let drained = tokio::time::timeout(deadline, async {
            loop {
                let busy = schedulers.iter().any(|s| s.in_flight_estimate() > 0);
                if !busy {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("shutdown deadline elapsed with requests still in flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use rcc_provider_core::{CircuitBreakerConfig, CredentialPool, EventHub, LoadBalancingStrategy, RetryPolicy};
    use rcc_transform::normalized::{NormalizedMessage, NormalizedRequest, NormalizedRole};

    use crate::breaker::CircuitBreaker;
    use crate::pipeline::Pipeline;
    use crate::scheduler::{PipelinePool, PipelineScheduler};
    use crate::test_support::{credentials_with_one_key, provider_config, target, FakeAdapter, Script, ScriptedClient};
    use crate::upstream_client::UpstreamClient;

    fn ctx(virtual_model_id: &str) -> RequestContext {
        RequestContext::new(
            "req-1".to_string(),
            virtual_model_id.to_string(),
            NormalizedRequest {
                model: virtual_model_id.to_string(),
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

    async fn one_pipeline_scheduler(client: Arc<dyn UpstreamClient>) -> Arc<PipelineScheduler> {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "p1").await;
        let pipeline = Arc::new(Pipeline::new(
            "default".to_string(),
            target("p1", "model-a"),
            provider_config("p1"),
            Arc::new(FakeAdapter),
            credentials,
            CircuitBreaker::new(CircuitBreakerConfig::default()),
        ));
        let pool = PipelinePool::new(
            "default".to_string(),
            vec![pipeline],
            LoadBalancingStrategy::RoundRobin,
            RetryPolicy::default(),
        );
        PipelineScheduler::new(pool, client, events, 50)
    }

    #[tokio::test]
    async fn unknown_virtual_model_is_an_error_without_touching_any_scheduler() {
        let manager = Manager::empty(Tracker::new(EventHub::new(16), None));
        let result = manager.route(ctx("nonexistent")).await;
        assert!(matches!(result, Err(CoreError::UnknownVirtualModel { .. })));
    }

    #[tokio::test]
    async fn routes_to_the_matching_scheduler_and_returns_its_response() {
        let client = Arc::new(ScriptedClient::new());
        client.program("p1", vec![Script::Http { status: 200, body: "pong" }]);
        let scheduler = one_pipeline_scheduler(client.clone()).await;

        let mut schedulers = HashMap::new();
        schedulers.insert("default".to_string(), scheduler);
        let manager = Manager::new(schedulers, Tracker::new(EventHub::new(16), None));

        let response = manager.route(ctx("default")).await.expect("routes successfully");
        match &response.blocks[0] {
            rcc_transform::normalized::NormalizedBlock::Text { text } => assert_eq!(text, "pong"),
            other => panic!("expected text block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reload_swaps_the_whole_map_atomically() {
        let manager = Manager::empty(Tracker::new(EventHub::new(16), None));
        assert!(manager.list_virtual_models().is_empty());

        let client = Arc::new(ScriptedClient::new());
        client.program("p1", vec![Script::Http { status: 200, body: "pong" }]);
        let scheduler = one_pipeline_scheduler(client).await;
        let mut schedulers = HashMap::new();
        schedulers.insert("default".to_string(), scheduler);
        manager.install(schedulers);

        assert_eq!(manager.list_virtual_models(), vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn shutdown_drains_before_returning() {
        let manager = Manager::empty(Tracker::new(EventHub::new(16), None));
        manager.shutdown(Duration::from_millis(50)).await;
        // No in-flight schedulers: shutdown must return promptly, not hang.
    }
}
