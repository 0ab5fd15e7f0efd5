use bytes::Bytes;

use rcc_provider_core::classification::{classify_http, classify_transport};
use rcc_provider_core::{
    AdapterContext, Classification, Headers, HttpMethod, ProviderAdapter, ProviderConfig,
    ProviderError, ProviderProtocol, ProviderResult, Secret, UpstreamFailure, UpstreamHttpRequest,
    header_set,
};
use rcc_transform::normalized::{NormalizedRequest, NormalizedResponse, NormalizedStreamEvent};
use rcc_transform::TransformError;

/// Speaks the Gemini generateContent dialect. The model id travels in the
/// URL path rather than the body, and the key travels as a header rather
/// than `Authorization`.
#[derive(Debug, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn protocol(&self) -> ProviderProtocol {
        ProviderProtocol::Gemini
    }

    fn prepare(
        &self,
        ctx: &AdapterContext,
        config: &ProviderConfig,
        secret: &Secret,
        request: &NormalizedRequest,
    ) -> ProviderResult<UpstreamHttpRequest> {
        let base_url = config.base_url.trim_end_matches('/');
        let model = &request.model;
        let url = if request.stream {
            format!("{base_url}/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("{base_url}/models/{model}:generateContent")
        };

        let body = rcc_transform::gemini::request_from_normalized(request);
        let payload =
            serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?;

        let mut headers: Headers = config.extra_headers.clone();
        header_set(&mut headers, "x-goog-api-key", api_key(secret)?);
        header_set(&mut headers, "content-type", "application/json");
        header_set(&mut headers, "accept", "application/json");

        tracing::debug!(provider_id = %config.id, trace_id = %ctx.trace_id, model = %request.model, is_stream = request.stream, "prepared upstream request");

        Ok(UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(Bytes::from(payload)),
            is_stream: request.stream,
        })
    }

    fn normalize(&self, body: &[u8]) -> Result<NormalizedResponse, TransformError> {
        let parsed = serde_json::from_slice(body).map_err(|err| TransformError::MalformedResponse {
            proto: rcc_transform::Proto::Gemini,
            reason: err.to_string(),
        })?;
        rcc_transform::gemini::response_to_normalized(parsed, String::new())
    }

    fn normalize_stream_chunk(
        &self,
        chunk: &[u8],
    ) -> Result<Vec<NormalizedStreamEvent>, TransformError> {
        let parsed = serde_json::from_slice(chunk).map_err(|err| TransformError::MalformedStreamChunk {
            proto: rcc_transform::Proto::Gemini,
            reason: err.to_string(),
        })?;
        Ok(rcc_transform::gemini::stream_chunk_to_normalized(parsed))
    }

    fn classify(&self, host: &str, failure: &UpstreamFailure) -> Classification {
        match failure {
            UpstreamFailure::Transport { kind, .. } => classify_transport(*kind),
            UpstreamFailure::Http { status, body, .. } => {
                let message = rcc_provider_core::error_shape::extract_message(host, body)
                    .unwrap_or_default();
                classify_http(*status, &Vec::new(), &message)
            }
        }
    }
}

fn api_key(secret: &Secret) -> ProviderResult<&str> {
    match secret {
        Secret::ApiKey(key) => Ok(key.as_str()),
        Secret::Bearer(token) => Ok(token.as_str()),
        Secret::Structured(_) => Err(ProviderError::MissingCredentialField(
            "expected an api key for a Gemini provider",
        )),
    }
}
