//! Shared fixtures for `rcc-core`'s own test modules: a scripted
//! [`ProviderAdapter`]/[`UpstreamClient`] pair that lets `pipeline`,
//! `scheduler`, `manager`, and `prober` tests drive attempts deterministically
//! without a real upstream. Not part of the public API — `#[cfg(test)]` only.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rcc_provider_core::provider::{AdapterContext, UpstreamBody, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse};
use rcc_provider_core::{
    Classification, CountTokensMode, CredentialPool, HttpMethod, ProviderAdapter, ProviderConfig,
    ProviderProtocol, Secret, Target,
};
use rcc_transform::normalized::{
    NormalizedBlock, NormalizedResponse, NormalizedStreamEvent, NormalizedUsage, StopReason,
};
use rcc_transform::TransformError;

use crate::upstream_client::UpstreamClient;

/// One scripted outcome for a single southbound call.
#[derive(Debug, Clone)]
pub enum Script {
    Http { status: u16, body: &'static str },
    Transport(&'static str),
}

/// A [`ProviderAdapter`] whose `prepare`/`normalize`/`classify` are the
/// minimum needed to exercise the pipeline/scheduler plumbing: the wire
/// "request" just carries the provider id in its URL so [`ScriptedClient`]
/// can look up which script queue answers it.
pub struct FakeAdapter;

impl ProviderAdapter for FakeAdapter {
    fn protocol(&self) -> ProviderProtocol {
        ProviderProtocol::OpenAiCompatible
    }

    fn prepare(
        &self,
        _ctx: &AdapterContext,
        config: &ProviderConfig,
        _secret: &Secret,
        _request: &rcc_transform::normalized::NormalizedRequest,
    ) -> rcc_provider_core::ProviderResult<UpstreamHttpRequest> {
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url: format!("test://{}/chat", config.id),
            headers: Vec::new(),
            body: Some(Bytes::from_static(b"{}")),
            is_stream: false,
        })
    }

    fn normalize(&self, body: &[u8]) -> Result<NormalizedResponse, TransformError> {
        Ok(NormalizedResponse {
            model: "fake-model".to_string(),
            blocks: vec![NormalizedBlock::Text {
                text: String::from_utf8_lossy(body).to_string(),
            }],
            stop_reason: Some(StopReason::EndTurn),
            usage: NormalizedUsage::default(),
        })
    }

    fn normalize_stream_chunk(
        &self,
        _chunk: &[u8],
    ) -> Result<Vec<NormalizedStreamEvent>, TransformError> {
        Ok(Vec::new())
    }

    fn classify(&self, _host: &str, failure: &UpstreamFailure) -> Classification {
        match failure {
            UpstreamFailure::Http { status, body, .. } => {
                let message = String::from_utf8_lossy(body);
                rcc_provider_core::classification::classify_http(*status, &Vec::new(), &message)
            }
            UpstreamFailure::Transport { kind, .. } => {
                rcc_provider_core::classification::classify_transport(*kind)
            }
        }
    }
}

/// A [`UpstreamClient`] that answers each provider id's southbound calls
/// from its own pre-loaded queue, repeating the last entry once a queue
/// drains so a test doesn't need to script more attempts than it cares
/// about. Also counts total calls per provider for assertions.
pub struct ScriptedClient {
    queues: Mutex<HashMap<String, VecDeque<Script>>>,
    calls: Mutex<HashMap<String, u32>>,
    total_calls: AtomicU32,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            total_calls: AtomicU32::new(0),
        }
    }

    pub fn program(&self, provider_id: &str, scripts: Vec<Script>) {
        self.queues
            .lock()
            .expect("lock poisoned")
            .insert(provider_id.to_string(), VecDeque::from(scripts));
    }

    pub fn calls_for(&self, provider_id: &str) -> u32 {
        self.calls.lock().expect("lock poisoned").get(provider_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.total_calls.load(Ordering::Relaxed)
    }

    fn provider_of(url: &str) -> String {
        url.trim_start_matches("test://")
            .split('/')
            .next()
            .unwrap_or("")
            .to_string()
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>,
    > {
        let provider_id = Self::provider_of(&req.url);
        Box::pin(async move {
            self.total_calls.fetch_add(1, Ordering::Relaxed);
            *self.calls.lock().expect("lock poisoned").entry(provider_id.clone()).or_insert(0) += 1;

            let script = {
                let mut queues = self.queues.lock().expect("lock poisoned");
                let queue = queues.entry(provider_id.clone()).or_default();
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            };

            match script {
                Some(Script::Http { status, body }) => Ok(UpstreamHttpResponse {
                    status,
                    headers: Vec::new(),
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                Some(Script::Transport(message)) => Err(UpstreamFailure::Transport {
                    kind: rcc_provider_core::classification::TransportErrorKind::Connect,
                    message: message.to_string(),
                }),
                None => Err(UpstreamFailure::Transport {
                    kind: rcc_provider_core::classification::TransportErrorKind::Connect,
                    message: format!("no script loaded for provider {provider_id}"),
                }),
            }
        })
    }
}

pub fn provider_config(id: &str) -> ProviderConfig {
    ProviderConfig {
        id: id.to_string(),
        protocol: ProviderProtocol::OpenAiCompatible,
        base_url: format!("https://{id}.example.com"),
        extra_headers: Vec::new(),
        models: vec![],
        count_tokens: CountTokensMode::Estimate,
    }
}

pub fn target(provider_id: &str, model_id: &str) -> Target {
    Target {
        provider_id: provider_id.to_string(),
        model_id: model_id.to_string(),
        credential_selector: Default::default(),
        weight: 1,
        enabled: true,
    }
}

pub async fn credentials_with_one_key(pool: &Arc<CredentialPool>, provider_id: &str) {
    pool.insert(provider_id, Secret::ApiKey(format!("key-{provider_id}")), 1, None, None)
        .await;
}
