use serde::{Deserialize, Serialize};

use crate::headers::Headers;

/// The southbound wire dialect a provider speaks. Selects which
/// [`crate::provider::ProviderAdapter`] handles its traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderProtocol {
    OpenAiCompatible,
    Anthropic,
    Gemini,
}

/// How a provider's token count for a request should be obtained when the
/// caller needs it ahead of dispatch (the token-limit prober, context-window
/// checks). Providers that don't expose a cheap counting endpoint fall back
/// to estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountTokensMode {
    Upstream,
    Estimate,
}

/// A declared model a provider serves. `context_window` feeds capability
/// detection when a virtual model's target does not pin a context budget
/// explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

/// Static, ingest-time configuration for one upstream provider: where it
/// lives, which dialect it speaks, and what it claims to serve. Credential
/// material is held separately in [`crate::credential::CredentialPool`],
/// keyed by this provider's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub protocol: ProviderProtocol,
    pub base_url: String,
    #[serde(default)]
    pub extra_headers: Headers,
    #[serde(default)]
    pub models: Vec<ModelRecord>,
    #[serde(default = "default_count_tokens_mode")]
    pub count_tokens: CountTokensMode,
}

fn default_count_tokens_mode() -> CountTokensMode {
    CountTokensMode::Estimate
}

impl ProviderConfig {
    pub fn model(&self, id: &str) -> Option<&ModelRecord> {
        self.models.iter().find(|m| m.id == id)
    }
}
