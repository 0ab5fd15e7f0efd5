//! Pipeline (C3, spec §4.3): an ordered, immutable chain bound to one
//! `Target`, terminating in a Provider Adapter. RCC's transform steps
//! (protocol translation) are folded into the adapter's own
//! `prepare`/`normalize` pair rather than modeled as separate upstream
//! `Step` objects — the adapter *is* the one transform-then-adapt step this
//! repo's fixed 3-dialect design needs; see `DESIGN.md` for why a generic
//! `Step` trait would only add indirection here. Pipelines never retry
//! internally; that is the scheduler's job.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use rcc_provider_core::provider::{AdapterContext, ByteStream, UpstreamFailure};
use rcc_provider_core::{
    Classification, CredentialId, CredentialPool, Event, EventHub, ProviderAdapter,
    ProviderConfig, SelectionPolicy, Target, UpstreamEvent,
};
use rcc_transform::normalized::{NormalizedBlock, NormalizedRequest, NormalizedResponse};
use rcc_provider_core::CredentialSelector;
use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::health::HealthTracker;
use crate::upstream_client::UpstreamClient;

/// Outcome of one pipeline attempt, handed back to the scheduler to decide
/// retry/breaker/health bookkeeping.
pub struct PipelineAttempt {
    pub classification: Classification,
    pub response: Option<NormalizedResponse>,
    pub credential_id: Option<CredentialId>,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub error_message: Option<String>,
}

fn host_of(base_url: &str) -> String {
    base_url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(base_url)
        .to_string()
}

pub struct Pipeline {
    pub id: String,
    pub virtual_model_id: String,
    pub target: Target,
    pub provider_config: ProviderConfig,
    pub adapter: std::sync::Arc<dyn ProviderAdapter>,
    pub credentials: std::sync::Arc<CredentialPool>,
    pub breaker: CircuitBreaker,
    pub health: HealthTracker,
    enabled: AtomicBool,
    in_flight: AtomicU32,
    last_success: Mutex<Option<SystemTime>>,
    last_failure: Mutex<Option<SystemTime>>,
    host: String,
}

impl Pipeline {
    pub fn new(
        virtual_model_id: String,
        target: Target,
        provider_config: ProviderConfig,
        adapter: std::sync::Arc<dyn ProviderAdapter>,
        credentials: std::sync::Arc<CredentialPool>,
        breaker: CircuitBreaker,
    ) -> Self {
        let host = host_of(&provider_config.base_url);
        let id = format!(
            "{}:{}:{}",
            virtual_model_id, provider_config.id, target.model_id
        );
        Self {
            id,
            virtual_model_id,
            enabled: AtomicBool::new(target.enabled),
            target,
            provider_config,
            adapter,
            credentials,
            breaker,
            health: HealthTracker::new(),
            in_flight: AtomicU32::new(0),
            last_success: Mutex::new(None),
            last_failure: Mutex::new(None),
            host,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, value: bool) {
        self.enabled.store(value, Ordering::Relaxed);
    }

    /// Selectable by the scheduler: enabled, and not sitting behind an open
    /// breaker (spec invariant 3: "a pipeline whose breaker is open is
    /// never selected").
    pub fn is_selectable(&self) -> bool {
        self.enabled() && self.breaker.is_available()
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn weight(&self) -> u32 {
        self.target.weight.max(1)
    }

    pub fn last_success(&self) -> Option<SystemTime> {
        *self.last_success.lock().expect("lock poisoned")
    }

    pub fn last_failure(&self) -> Option<SystemTime> {
        *self.last_failure.lock().expect("lock poisoned")
    }

    /// Runs one single-shot attempt: acquire credential, prepare, invoke,
    /// classify, normalize, release, and record health/breaker state. Never
    /// retries; a retryable classification is returned to the caller to
    /// act on.
    pub async fn execute(
        &self,
        request_id: &str,
        attempt_no: u32,
        request: &NormalizedRequest,
        client: &dyn UpstreamClient,
        events: &EventHub,
        deadline: Duration,
    ) -> PipelineAttempt {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let started_at = SystemTime::now();
        let attempt = self
            .execute_inner(request_id, attempt_no, request, client, deadline)
            .await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);

        self.health.record(attempt.classification);
        self.breaker.record(attempt.classification);
        if attempt.classification == Classification::Success {
            *self.last_success.lock().expect("lock poisoned") = Some(attempt.ended_at);
        } else {
            *self.last_failure.lock().expect("lock poisoned") = Some(attempt.ended_at);
        }

        let latency_ms = attempt
            .ended_at
            .duration_since(started_at)
            .unwrap_or_default()
            .as_millis() as u64;
        events
            .emit(Event::Upstream(UpstreamEvent {
                trace_id: request_id.to_string(),
                at: attempt.ended_at,
                virtual_model_id: self.virtual_model_id.clone(),
                pipeline_id: self.id.clone(),
                provider: self.provider_config.id.clone(),
                credential_id: attempt.credential_id,
                attempt_no,
                model: self.target.model_id.clone(),
                response_status: None,
                classification: attempt.classification,
                usage: attempt
                    .response
                    .as_ref()
                    .map(|r| r.usage.clone()),
                error_message: attempt.error_message.clone(),
                latency_ms,
            }))
            .await;

        attempt
    }

    async fn execute_inner(
        &self,
        request_id: &str,
        attempt_no: u32,
        request: &NormalizedRequest,
        client: &dyn UpstreamClient,
        deadline: Duration,
    ) -> PipelineAttempt {
        let started_at = SystemTime::now();

        let acquired = match &self.target.credential_selector {
            CredentialSelector::Any => {
                self.credentials
                    .acquire(&self.provider_config.id, SelectionPolicy::RoundRobin)
                    .await
            }
            CredentialSelector::Named(name) => {
                self.credentials
                    .acquire_named(&self.provider_config.id, name)
                    .await
            }
        };

        let (credential_id, release, secret) = match acquired {
            Ok((id, release)) => {
                let secret = match self.credentials.secret_of(id).await {
                    Some(secret) => secret,
                    None => {
                        return PipelineAttempt {
                            classification: Classification::AuthFailure,
                            response: None,
                            credential_id: Some(id),
                            started_at,
                            ended_at: SystemTime::now(),
                            error_message: Some("credential vanished after acquire".into()),
                        };
                    }
                };
                (id, release, secret)
            }
            Err(_) => {
                return PipelineAttempt {
                    classification: Classification::AuthFailure,
                    response: None,
                    credential_id: None,
                    started_at,
                    ended_at: SystemTime::now(),
                    error_message: Some("no active credential for provider".into()),
                };
            }
        };

        let ctx = AdapterContext {
            trace_id: request_id.to_string(),
            provider_id: self.provider_config.id.clone(),
            credential_id: Some(credential_id),
            attempt_no,
        };

        let wire_request =
            match self
                .adapter
                .prepare(&ctx, &self.provider_config, &secret, request)
            {
                Ok(req) => req,
                Err(err) => {
                    release.report(Classification::Malformed).await;
                    return PipelineAttempt {
                        classification: Classification::Malformed,
                        response: None,
                        credential_id: Some(credential_id),
                        started_at,
                        ended_at: SystemTime::now(),
                        error_message: Some(err.to_string()),
                    };
                }
            };

        let result = client.send_with_deadline(wire_request, deadline).await;

        let (classification, response, error_message) = match result {
            Ok(http_response) => {
                if (200..300).contains(&http_response.status) {
                    match http_response.body {
                        rcc_provider_core::UpstreamBody::Bytes(bytes) => {
                            match self.adapter.normalize(&bytes) {
                                Ok(normalized) => (Classification::Success, Some(normalized), None),
                                Err(err) => (Classification::Malformed, None, Some(err.to_string())),
                            }
                        }
                        rcc_provider_core::UpstreamBody::Stream(rx) => {
                            let normalized = self.accumulate_stream(rx, &request.model).await;
                            (Classification::Success, Some(normalized), None)
                        }
                    }
                } else {
                    let body = match http_response.body {
                        rcc_provider_core::UpstreamBody::Bytes(bytes) => bytes,
                        rcc_provider_core::UpstreamBody::Stream(_) => bytes::Bytes::new(),
                    };
                    let failure = UpstreamFailure::Http {
                        status: http_response.status,
                        headers: http_response.headers,
                        body: body.clone(),
                    };
                    let classification = self.adapter.classify(&self.host, &failure);
                    let message = String::from_utf8_lossy(&body).to_string();
                    (classification, None, Some(message))
                }
            }
            Err(failure) => {
                let message = match &failure {
                    UpstreamFailure::Transport { message, .. } => message.clone(),
                    UpstreamFailure::Http { .. } => String::new(),
                };
                let classification = self.adapter.classify(&self.host, &failure);
                (classification, None, Some(message))
            }
        };

        release.report(classification).await;

        PipelineAttempt {
            classification,
            response,
            credential_id: Some(credential_id),
            started_at,
            ended_at: SystemTime::now(),
            error_message,
        }
    }

    /// Consumes a provider's server-sent-event stream and folds it into one
    /// [`NormalizedResponse`] (spec §9: streaming upstream responses must be
    /// representable, but this gateway's northbound surface returns a single
    /// buffered body, so the pipeline is the stream-aware side and the
    /// client-facing side is declared non-streaming). A chunk the adapter
    /// can't parse is logged and skipped rather than failing the whole
    /// response — providers occasionally interleave comments or keep-alive
    /// lines with real data events.
    async fn accumulate_stream(&self, mut rx: ByteStream, fallback_model: &str) -> NormalizedResponse {
        enum AccBlock {
            Text(String),
            ToolUse {
                id: String,
                name: String,
                partial_json: String,
            },
        }

        let mut parser = rcc_protocol::sse::SseParser::new();
        let mut model = fallback_model.to_string();
        let mut blocks: std::collections::BTreeMap<usize, AccBlock> =
            std::collections::BTreeMap::new();
        let mut stop_reason = None;
        let mut usage = rcc_transform::normalized::NormalizedUsage::default();

        let mut apply_events = |events: Vec<rcc_transform::normalized::NormalizedStreamEvent>| {
            for event in events {
                use rcc_transform::normalized::NormalizedStreamEvent;
                match event {
                    NormalizedStreamEvent::Start { model: m } => model = m,
                    NormalizedStreamEvent::TextDelta { index, text } => {
                        match blocks.entry(index).or_insert_with(|| AccBlock::Text(String::new())) {
                            AccBlock::Text(existing) => existing.push_str(&text),
                            other @ AccBlock::ToolUse { .. } => *other = AccBlock::Text(text),
                        }
                    }
                    NormalizedStreamEvent::ToolUseStart { index, id, name } => {
                        blocks.insert(
                            index,
                            AccBlock::ToolUse {
                                id,
                                name,
                                partial_json: String::new(),
                            },
                        );
                    }
                    NormalizedStreamEvent::ToolUseInputDelta { index, partial_json } => {
                        if let Some(AccBlock::ToolUse { partial_json: buf, .. }) =
                            blocks.get_mut(&index)
                        {
                            buf.push_str(&partial_json);
                        }
                    }
                    NormalizedStreamEvent::BlockStop { .. } => {}
                    NormalizedStreamEvent::Done { stop_reason: sr, usage: u } => {
                        stop_reason = sr;
                        usage = u;
                    }
                }
            }
        };

        let mut handle_event = |data: &str, adapter: &dyn ProviderAdapter| {
            if data == "[DONE]" {
                return;
            }
            match adapter.normalize_stream_chunk(data.as_bytes()) {
                Ok(events) => apply_events(events),
                Err(err) => debug!(error = %err, "skipping unparseable stream chunk"),
            }
        };

        while let Some(chunk) = rx.recv().await {
            for event in parser.push_bytes(&chunk) {
                handle_event(&event.data, self.adapter.as_ref());
            }
        }
        for event in parser.finish() {
            handle_event(&event.data, self.adapter.as_ref());
        }

        let blocks = blocks
            .into_values()
            .map(|block| match block {
                AccBlock::Text(text) => NormalizedBlock::Text { text },
                AccBlock::ToolUse { id, name, partial_json } => NormalizedBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::from_str(&partial_json)
                        .unwrap_or(serde_json::Value::Null),
                },
            })
            .collect();

        NormalizedResponse {
            model,
            blocks,
            stop_reason,
            usage,
        }
    }

    /// Minimal one-token "ping" issued by the scheduler's periodic health
    /// check against an `open` breaker (spec §4.4 Health checks). Unlike
    /// [`Self::execute`], a probe never touches the health EWMA or the
    /// in-flight counter and only ever moves the breaker `open -> half_open`
    /// on success — the very next real request still decides
    /// `half_open -> closed`, matching S3's "after cooldown and a
    /// successful probe, breaker -> half_open -> closed".
    pub async fn probe(&self, client: &dyn UpstreamClient) -> Classification {
        let request = NormalizedRequest {
            model: self.target.model_id.clone(),
            messages: vec![rcc_transform::normalized::NormalizedMessage::text(
                rcc_transform::normalized::NormalizedRole::User,
                "ping",
            )],
            system: None,
            max_tokens: Some(1),
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
        };

        let acquired = match &self.target.credential_selector {
            CredentialSelector::Any => {
                self.credentials
                    .acquire(&self.provider_config.id, SelectionPolicy::RoundRobin)
                    .await
            }
            CredentialSelector::Named(name) => {
                self.credentials
                    .acquire_named(&self.provider_config.id, name)
                    .await
            }
        };
        let Ok((credential_id, release)) = acquired else {
            return Classification::AuthFailure;
        };
        let Some(secret) = self.credentials.secret_of(credential_id).await else {
            release.report(Classification::AuthFailure).await;
            return Classification::AuthFailure;
        };

        let ctx = AdapterContext {
            trace_id: format!("probe-{}", self.id),
            provider_id: self.provider_config.id.clone(),
            credential_id: Some(credential_id),
            attempt_no: 1,
        };

        let wire_request = match self
            .adapter
            .prepare(&ctx, &self.provider_config, &secret, &request)
        {
            Ok(req) => req,
            Err(_) => {
                release.report(Classification::Malformed).await;
                return Classification::Malformed;
            }
        };

        let classification = match client
            .send_with_deadline(wire_request, Duration::from_secs(10))
            .await
        {
            Ok(response) if (200..300).contains(&response.status) => Classification::Success,
            Ok(response) => {
                let body = match response.body {
                    rcc_provider_core::UpstreamBody::Bytes(bytes) => bytes,
                    rcc_provider_core::UpstreamBody::Stream(_) => bytes::Bytes::new(),
                };
                let failure = UpstreamFailure::Http {
                    status: response.status,
                    headers: response.headers,
                    body,
                };
                self.adapter.classify(&self.host, &failure)
            }
            Err(failure) => self.adapter.classify(&self.host, &failure),
        };

        release.report(classification).await;
        if classification == Classification::Success {
            self.breaker.probe_succeeded();
        }
        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use rcc_provider_core::{CircuitBreakerConfig, EventHub};
    use rcc_transform::normalized::NormalizedMessage;

    use crate::test_support::{credentials_with_one_key, provider_config, target, FakeAdapter, Script, ScriptedClient};

    fn pipeline(provider_id: &str, credentials: Arc<CredentialPool>) -> Pipeline {
        Pipeline::new(
            "default".to_string(),
            target(provider_id, "model-a"),
            provider_config(provider_id),
            Arc::new(FakeAdapter),
            credentials,
            CircuitBreaker::new(CircuitBreakerConfig::default()),
        )
    }

    fn request() -> NormalizedRequest {
        NormalizedRequest {
            model: "default".to_string(),
            messages: vec![NormalizedMessage::text(
                rcc_transform::normalized::NormalizedRole::User,
                "ping",
            )],
            system: None,
            max_tokens: Some(64),
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
        }
    }

    #[tokio::test]
    async fn success_normalizes_response_and_records_health() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "p1").await;
        let pipeline = pipeline("p1", credentials);

        let client = ScriptedClient::new();
        client.program("p1", vec![Script::Http { status: 200, body: "pong" }]);

        let attempt = pipeline
            .execute("req-1", 1, &request(), &client, &events, Duration::from_secs(5))
            .await;

        assert_eq!(attempt.classification, Classification::Success);
        let response = attempt.response.expect("success carries a body");
        match &response.blocks[0] {
            NormalizedBlock::Text { text } => assert_eq!(text, "pong"),
            other => panic!("expected text block, got {other:?}"),
        }
        assert_eq!(pipeline.health.score(), 1.0);
        assert_eq!(pipeline.breaker.state(), crate::breaker::BreakerState::Closed);
    }

    #[tokio::test]
    async fn server_error_is_retryable_and_does_not_consume_credential_cooldown() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "p1").await;
        let pipeline = pipeline("p1", credentials);

        let client = ScriptedClient::new();
        client.program("p1", vec![Script::Http { status: 500, body: "boom" }]);

        let attempt = pipeline
            .execute("req-1", 1, &request(), &client, &events, Duration::from_secs(5))
            .await;

        assert_eq!(attempt.classification, Classification::ServerError);
        assert!(attempt.response.is_none());
        assert!(attempt.classification.is_retryable());
    }

    #[tokio::test]
    async fn auth_failure_with_no_active_credential_short_circuits_without_calling_upstream() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        // No credential ingested for this provider.
        let pipeline = pipeline("p1", credentials);

        let client = ScriptedClient::new();
        client.program("p1", vec![Script::Http { status: 200, body: "pong" }]);

        let attempt = pipeline
            .execute("req-1", 1, &request(), &client, &events, Duration::from_secs(5))
            .await;

        assert_eq!(attempt.classification, Classification::AuthFailure);
        assert_eq!(client.total_calls(), 0, "adapter never invoked without a credential");
    }

    #[tokio::test]
    async fn token_limit_error_never_trips_the_breaker() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "p1").await;
        let pipeline = pipeline("p1", credentials);

        let client = ScriptedClient::new();
        client.program(
            "p1",
            vec![Script::Http {
                status: 400,
                body: "maximum context length of 8192 tokens",
            }],
        );

        for _ in 0..5 {
            let attempt = pipeline
                .execute("req-1", 1, &request(), &client, &events, Duration::from_secs(5))
                .await;
            assert_eq!(attempt.classification, Classification::TokenLimitExceeded);
        }
        assert_eq!(pipeline.breaker.state(), crate::breaker::BreakerState::Closed);
        assert!(pipeline.is_selectable());
    }

    #[tokio::test]
    async fn probe_moves_open_breaker_to_half_open_on_success() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "p1").await;
        let pipeline = pipeline("p1", credentials);

        // Trip the breaker first.
        let failing_client = ScriptedClient::new();
        failing_client.program("p1", vec![Script::Http { status: 500, body: "boom" }]);
        for _ in 0..CircuitBreakerConfig::default().failure_threshold {
            pipeline
                .execute("req-1", 1, &request(), &failing_client, &events, Duration::from_secs(5))
                .await;
        }
        assert_eq!(pipeline.breaker.state(), crate::breaker::BreakerState::Open);

        let healthy_client = ScriptedClient::new();
        healthy_client.program("p1", vec![Script::Http { status: 200, body: "pong" }]);
        let classification = pipeline.probe(&healthy_client).await;
        assert_eq!(classification, Classification::Success);
        assert_eq!(pipeline.breaker.state(), crate::breaker::BreakerState::HalfOpen);
    }
}
