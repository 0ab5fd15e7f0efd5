use std::time::Duration;

use bytes::Bytes;

use rcc_transform::normalized::{NormalizedRequest, NormalizedResponse, NormalizedStreamEvent};
use rcc_transform::TransformError;

use crate::classification::{Classification, TransportErrorKind};
use crate::config::{ModelRecord, ProviderConfig, ProviderProtocol};
use crate::credential::{CredentialId, Secret, UnavailableReason};
use crate::errors::ProviderResult;
use crate::headers::{Headers, header_get};

pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

/// Everything a pipeline attempt needs to know about itself that is not
/// part of the request body: identity for tracing, the provider and
/// credential chosen for this attempt, and which retry attempt this is.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub trace_id: String,
    pub provider_id: String,
    pub credential_id: Option<CredentialId>,
    pub attempt_no: u32,
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// Transport-level failure: no HTTP response was received at all.
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    /// An HTTP response was received, but it is an error the adapter must
    /// classify (usually non-2xx, but iFlow's dialect needs the body even
    /// on redirects/odd statuses).
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnavailableDecision {
    pub duration: Duration,
    pub reason: UnavailableReason,
}

const RATE_LIMIT_FALLBACK_SECS: u64 = 30;
const SHORT_COOLDOWN_SECS: u64 = 10;
const AUTH_INVALID_YEARS: u64 = 9_999;

/// Maps a southbound failure to how long its credential should be held
/// back from scheduling, independent of whether the pipeline itself trips
/// its circuit breaker (that decision is [`Classification::counts_toward_circuit_breaker`]).
pub fn default_decide_unavailable(failure: &UpstreamFailure) -> Option<UnavailableDecision> {
    match failure {
        UpstreamFailure::Http { status, headers, .. } => {
            if *status == 429 {
                let duration = parse_retry_after(headers)
                    .unwrap_or_else(|| Duration::from_secs(RATE_LIMIT_FALLBACK_SECS));
                return Some(UnavailableDecision {
                    duration,
                    reason: UnavailableReason::RateLimit,
                });
            }
            if *status == 401 || *status == 403 {
                return Some(UnavailableDecision {
                    duration: auth_invalid_duration(),
                    reason: UnavailableReason::AuthInvalid,
                });
            }
            if (500..600).contains(status) {
                return Some(UnavailableDecision {
                    duration: Duration::from_secs(SHORT_COOLDOWN_SECS),
                    reason: UnavailableReason::Upstream5xx,
                });
            }
            None
        }
        UpstreamFailure::Transport { .. } => Some(UnavailableDecision {
            duration: Duration::from_secs(SHORT_COOLDOWN_SECS),
            reason: UnavailableReason::Timeout,
        }),
    }
}

pub fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

fn auth_invalid_duration() -> Duration {
    Duration::from_secs(AUTH_INVALID_YEARS * 365 * 24 * 60 * 60)
}

/// What a declared model claims to support. Falls back to the static
/// [`ModelRecord`] from a provider's config when the adapter has no
/// better runtime source (e.g. a models.list response).
#[derive(Debug, Clone, Default)]
pub struct ModelCapabilities {
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

impl From<&ModelRecord> for ModelCapabilities {
    fn from(record: &ModelRecord) -> Self {
        Self {
            context_window: record.context_window,
            max_output_tokens: record.max_output_tokens,
        }
    }
}

/// The contract every concrete upstream integration implements (one per
/// wire dialect, not one per product — an OpenAI-compatible adapter serves
/// OpenAI, DeepSeek, iFlow, and any self-hosted OpenAI-shaped endpoint
/// through the same `ProviderConfig.base_url`).
///
/// Adapters never perform network IO themselves: `prepare` builds the wire
/// request and a shared transport (one per process, not one per adapter)
/// sends it, so every dialect gets the same connection pooling, proxying,
/// and timeout behavior.
pub trait ProviderAdapter: Send + Sync {
    fn protocol(&self) -> ProviderProtocol;

    /// Builds the southbound wire request for one canonical call. This is
    /// the only place a provider's header conventions, auth scheme, and URL
    /// shape are known.
    fn prepare(
        &self,
        ctx: &AdapterContext,
        config: &ProviderConfig,
        secret: &Secret,
        request: &NormalizedRequest,
    ) -> ProviderResult<UpstreamHttpRequest>;

    /// Converts a non-streaming wire response body into the canonical
    /// shape.
    fn normalize(&self, body: &[u8]) -> Result<NormalizedResponse, TransformError>;

    /// Converts one chunk of this provider's wire stream into canonical
    /// stream events. Adapters that receive multiple logical events in one
    /// chunk return all of them in order.
    fn normalize_stream_chunk(
        &self,
        chunk: &[u8],
    ) -> Result<Vec<NormalizedStreamEvent>, TransformError>;

    /// Classifies a southbound failure, given the host it came from (needed
    /// for host-dependent error-body shapes such as iFlow's).
    fn classify(&self, host: &str, failure: &UpstreamFailure) -> Classification;

    /// Reports what this provider's model claims to support, for
    /// capability-based routing. Default falls back to the static
    /// `ModelRecord` declared in config.
    fn detect_capabilities(&self, config: &ProviderConfig, model: &str) -> ModelCapabilities {
        config
            .model(model)
            .map(ModelCapabilities::from)
            .unwrap_or_default()
    }
}
