//! Token-Limit Prober (C7, spec §4.7): empirical discovery of a model's
//! real context window by issuing minimal requests at descending
//! `max_tokens` ceilings and reading the provider's own rejection message.
//! Probes never flow through a pipeline's breaker/health bookkeeping —
//! this is an out-of-band maintenance path, not routed traffic.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rcc_provider_core::provider::{AdapterContext, UpstreamFailure};
use rcc_provider_core::{
    Classification, CredentialPool, ProviderAdapter, ProviderConfig, SelectionPolicy,
};
use rcc_transform::normalized::{NormalizedMessage, NormalizedRequest, NormalizedRole};
use tokio::time::sleep;

use crate::upstream_client::UpstreamClient;

/// Descending probe ladder (spec §4.7), ceiling first.
pub const LADDER: &[u32] = &[
    524_288, 262_144, 131_072, 65_536, 32_768, 16_384, 8_192, 4_096,
];

/// Providers whose error-message wording is known to be unreliable for
/// this inference; probing is skipped for them entirely and their models
/// stay `unverified`. The iFlow family's error envelope carries a
/// different shape for its 400s and its numeric capture does not
/// reliably describe the true context window, so it ships here by
/// default (spec §4.7: "by design at least the iFlow family's
/// verification path bypasses probing").
pub fn default_skip_list() -> HashSet<String> {
    ["iflow"].into_iter().map(String::from).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeStep {
    pub limit: u32,
    pub classification: Classification,
    pub detected_n: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeVerdict {
    /// The model accepted a request at this ceiling; its true limit is at
    /// least this large (we stop at the first success, we don't binary
    /// search above the ladder's top rung).
    SupportsAtLeast(u32),
    /// The provider's own error told us the exact limit.
    Detected(u64),
    /// Every rung was exhausted without a usable signal.
    Inconclusive,
    /// This provider is on the skip list.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub provider_id: String,
    pub model_id: String,
    pub verdict: ProbeVerdict,
    pub steps: Vec<ProbeStep>,
}

pub struct TokenLimitProber {
    skip: HashSet<String>,
    rate_limit: Duration,
}

impl TokenLimitProber {
    pub fn new(skip: HashSet<String>, rate_limit: Duration) -> Self {
        Self { skip, rate_limit }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_skip_list(), Duration::from_secs(1))
    }

    fn is_skipped(&self, provider_family: &str) -> bool {
        self.skip
            .iter()
            .any(|pattern| provider_family.contains(pattern.as_str()))
    }

    /// Runs the full descending ladder against one `(provider, model)`,
    /// stopping at the first success or detected limit.
    pub async fn probe(
        &self,
        provider_family: &str,
        config: &ProviderConfig,
        model_id: &str,
        adapter: &Arc<dyn ProviderAdapter>,
        credentials: &Arc<CredentialPool>,
        client: &dyn UpstreamClient,
    ) -> ProbeOutcome {
        if self.is_skipped(provider_family) {
            return ProbeOutcome {
                provider_id: config.id.clone(),
                model_id: model_id.to_string(),
                verdict: ProbeVerdict::Skipped,
                steps: Vec::new(),
            };
        }

        let mut steps = Vec::new();
        let mut last_at: Option<Instant> = None;

        for &limit in LADDER {
            if let Some(at) = last_at {
                let elapsed = at.elapsed();
                if elapsed < self.rate_limit {
                    sleep(self.rate_limit - elapsed).await;
                }
            }
            last_at = Some(Instant::now());

            let step = self
                .probe_once(config, model_id, limit, adapter, credentials, client)
                .await;
            let verdict = match step.classification {
                Classification::Success => Some(ProbeVerdict::SupportsAtLeast(limit)),
                Classification::TokenLimitExceeded => {
                    step.detected_n.map(ProbeVerdict::Detected)
                }
                _ => None,
            };
            let stop = verdict.is_some();
            steps.push(step);
            if let Some(verdict) = verdict {
                return ProbeOutcome {
                    provider_id: config.id.clone(),
                    model_id: model_id.to_string(),
                    verdict,
                    steps,
                };
            }
            if stop {
                break;
            }
        }

        ProbeOutcome {
            provider_id: config.id.clone(),
            model_id: model_id.to_string(),
            verdict: ProbeVerdict::Inconclusive,
            steps,
        }
    }

    async fn probe_once(
        &self,
        config: &ProviderConfig,
        model_id: &str,
        limit: u32,
        adapter: &Arc<dyn ProviderAdapter>,
        credentials: &Arc<CredentialPool>,
        client: &dyn UpstreamClient,
    ) -> ProbeStep {
        let acquired = credentials
            .acquire(&config.id, SelectionPolicy::RoundRobin)
            .await;
        let Ok((credential_id, release)) = acquired else {
            return ProbeStep {
                limit,
                classification: Classification::AuthFailure,
                detected_n: None,
            };
        };
        let Some(secret) = credentials.secret_of(credential_id).await else {
            release.report(Classification::AuthFailure).await;
            return ProbeStep {
                limit,
                classification: Classification::AuthFailure,
                detected_n: None,
            };
        };

        let request = NormalizedRequest {
            model: model_id.to_string(),
            messages: vec![NormalizedMessage::text(NormalizedRole::User, "ping")],
            system: None,
            max_tokens: Some(limit),
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
        };

        let ctx = AdapterContext {
            trace_id: format!("probe-{}-{}", config.id, limit),
            provider_id: config.id.clone(),
            credential_id: Some(credential_id),
            attempt_no: 1,
        };

        let wire_request = match adapter.prepare(&ctx, config, &secret, &request) {
            Ok(req) => req,
            Err(_) => {
                release.report(Classification::Malformed).await;
                return ProbeStep {
                    limit,
                    classification: Classification::Malformed,
                    detected_n: None,
                };
            }
        };

        let step = match client
            .send_with_deadline(wire_request, Duration::from_secs(30))
            .await
        {
            Ok(response) if (200..300).contains(&response.status) => ProbeStep {
                limit,
                classification: Classification::Success,
                detected_n: None,
            },
            Ok(response) => {
                let body = match response.body {
                    rcc_provider_core::UpstreamBody::Bytes(bytes) => bytes,
                    rcc_provider_core::UpstreamBody::Stream(_) => bytes::Bytes::new(),
                };
                let failure = UpstreamFailure::Http {
                    status: response.status,
                    headers: response.headers,
                    body: body.clone(),
                };
                let classification = adapter.classify(&host_of(&config.base_url), &failure);
                let message = String::from_utf8_lossy(&body);
                let detected_n = rcc_provider_core::classification::extract_token_limit(&message);
                ProbeStep {
                    limit,
                    classification,
                    detected_n,
                }
            }
            Err(failure) => {
                let classification = adapter.classify(&host_of(&config.base_url), &failure);
                ProbeStep {
                    limit,
                    classification,
                    detected_n: None,
                }
            }
        };

        release.report(step.classification).await;
        step
    }
}

fn host_of(base_url: &str) -> String {
    base_url
        .split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(base_url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    use rcc_provider_core::EventHub;

    use crate::test_support::{credentials_with_one_key, provider_config, FakeAdapter, Script, ScriptedClient};

    fn fast_prober() -> TokenLimitProber {
        TokenLimitProber::new(HashSet::new(), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn stops_at_first_success_without_trying_smaller_limits() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "p1").await;

        let client = ScriptedClient::new();
        client.program("p1", vec![Script::Http { status: 200, body: "pong" }]);

        let adapter: StdArc<dyn ProviderAdapter> = StdArc::new(FakeAdapter);
        let outcome = fast_prober()
            .probe("p1", &provider_config("p1"), "model-a", &adapter, &credentials, &client)
            .await;

        assert_eq!(outcome.verdict, ProbeVerdict::SupportsAtLeast(LADDER[0]));
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(client.total_calls(), 1);
    }

    #[tokio::test]
    async fn detects_limit_from_rejection_message_and_stops() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "p1").await;

        let client = ScriptedClient::new();
        client.program(
            "p1",
            vec![Script::Http {
                status: 400,
                body: "maximum context length of 65536 tokens",
            }],
        );

        let adapter: StdArc<dyn ProviderAdapter> = StdArc::new(FakeAdapter);
        let outcome = fast_prober()
            .probe("p1", &provider_config("p1"), "model-a", &adapter, &credentials, &client)
            .await;

        assert_eq!(outcome.verdict, ProbeVerdict::Detected(65536));
        assert_eq!(outcome.steps.len(), 1);
    }

    #[tokio::test]
    async fn continues_down_the_ladder_on_inconclusive_responses() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "p1").await;

        let client = ScriptedClient::new();
        // Every rung returns a 400 with no parseable token-limit phrase.
        client.program("p1", vec![Script::Http { status: 400, body: "bad request" }]);

        let adapter: StdArc<dyn ProviderAdapter> = StdArc::new(FakeAdapter);
        let outcome = fast_prober()
            .probe("p1", &provider_config("p1"), "model-a", &adapter, &credentials, &client)
            .await;

        assert_eq!(outcome.verdict, ProbeVerdict::Inconclusive);
        assert_eq!(outcome.steps.len(), LADDER.len());
        assert_eq!(client.total_calls(), LADDER.len() as u32);
    }

    #[tokio::test]
    async fn skip_listed_provider_family_is_never_probed() {
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        credentials_with_one_key(&credentials, "iflow-prod").await;

        let client = ScriptedClient::new();
        client.program("iflow-prod", vec![Script::Http { status: 200, body: "pong" }]);

        let adapter: StdArc<dyn ProviderAdapter> = StdArc::new(FakeAdapter);
        let prober = TokenLimitProber::with_defaults();
        let outcome = prober
            .probe(
                "iflow",
                &provider_config("iflow-prod"),
                "model-a",
                &adapter,
                &credentials,
                &client,
            )
            .await;

        assert_eq!(outcome.verdict, ProbeVerdict::Skipped);
        assert_eq!(outcome.steps.len(), 0);
        assert_eq!(client.total_calls(), 0);
    }
}
