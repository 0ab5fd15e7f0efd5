//! Structured configuration (spec §6): `providers` and `virtualModels`,
//! loaded once at startup (and re-loaded on demand) into the shapes
//! `rcc-provider-core` and the assembler consume. Editing, diffing, and
//! persisting this configuration is the out-of-scope Web UI's job; this
//! module only reads it.

use std::collections::HashMap;
use std::path::Path;

use rcc_provider_core::{CountTokensMode, Headers, ModelRecord, ProviderProtocol, VirtualModelConfig};
use serde::Deserialize;

fn default_weight() -> u32 {
    1
}

fn default_count_tokens_mode() -> CountTokensMode {
    CountTokensMode::Estimate
}

/// One resolved credential ready for `CredentialPool::insert_named`. The
/// `value` field has already gone through §6's path-vs-inline resolution
/// by the time this reaches a caller.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub provider_id: String,
    pub value: String,
    pub name: Option<String>,
    pub weight: u32,
    pub rpm_limit: Option<u32>,
    pub rpd_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CredentialItem {
    Inline(String),
    Entry {
        value: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default = "default_weight")]
        weight: u32,
        #[serde(default)]
        rpm_limit: Option<u32>,
        #[serde(default)]
        rpd_limit: Option<u32>,
    },
}

/// `api_key` accepts a single inline/path string, or an array of strings
/// and/or `{value, name, weight, ...}` objects (spec §6: "Single-string
/// `api_key` fields are accepted as shorthand for a one-element array").
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ApiKeyField {
    Single(String),
    List(Vec<CredentialItem>),
}

impl Default for ApiKeyField {
    fn default() -> Self {
        ApiKeyField::List(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderDecl {
    id: String,
    protocol: ProviderProtocol,
    base_url: String,
    #[serde(default)]
    extra_headers: Headers,
    #[serde(default)]
    models: Vec<ModelRecord>,
    #[serde(default = "default_count_tokens_mode")]
    count_tokens: CountTokensMode,
    #[serde(default)]
    api_key: ApiKeyField,
}

#[derive(Debug, Clone, Deserialize)]
struct RccConfigRaw {
    #[serde(default)]
    providers: Vec<ProviderDecl>,
    #[serde(rename = "virtualModels", alias = "virtual_models", default)]
    virtual_models: Vec<VirtualModelConfig>,
}

pub struct LoadedConfig {
    pub providers: HashMap<String, rcc_provider_core::ProviderConfig>,
    pub credentials: Vec<ResolvedCredential>,
    pub virtual_models: Vec<VirtualModelConfig>,
    /// Non-fatal problems surfaced during load (unreadable secret file,
    /// duplicate provider id) — loading continues past these.
    pub warnings: Vec<String>,
}

/// A string starting with `./`, `/`, or `../`, or ending in one of the
/// recognized secret-file suffixes, is read from disk; everything else is
/// treated as an inline secret (spec §6).
fn looks_like_path(raw: &str) -> bool {
    const SUFFIXES: &[&str] = &[".key", ".txt", ".token", ".pem", ".json"];
    raw.starts_with("./")
        || raw.starts_with('/')
        || raw.starts_with("../")
        || SUFFIXES.iter().any(|suffix| raw.ends_with(suffix))
}

fn resolve_secret_value(raw: &str) -> anyhow::Result<String> {
    if looks_like_path(raw) {
        let content = std::fs::read_to_string(raw)
            .map_err(|err| anyhow::anyhow!("reading secret file {raw:?}: {err}"))?;
        Ok(content.trim().to_string())
    } else {
        Ok(raw.to_string())
    }
}

/// Loads and fully resolves a configuration file from disk (spec §6).
/// Secret material is read eagerly so a bad path fails fast at startup
/// rather than at first credential acquisition.
pub fn load_from_path(path: &Path) -> anyhow::Result<LoadedConfig> {
    let raw_text = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("reading config {}: {err}", path.display()))?;
    let raw: RccConfigRaw = serde_json::from_str(&raw_text)
        .map_err(|err| anyhow::anyhow!("parsing config {}: {err}", path.display()))?;

    let mut providers = HashMap::new();
    let mut credentials = Vec::new();
    let mut warnings = Vec::new();

    for decl in raw.providers {
        if providers.contains_key(&decl.id) {
            warnings.push(format!("duplicate provider id {:?}, keeping first", decl.id));
            continue;
        }

        let items = match decl.api_key {
            ApiKeyField::Single(value) => vec![CredentialItem::Inline(value)],
            ApiKeyField::List(items) => items,
        };

        for item in items {
            let (raw_value, name, weight, rpm_limit, rpd_limit) = match item {
                CredentialItem::Inline(value) => (value, None, default_weight(), None, None),
                CredentialItem::Entry {
                    value,
                    name,
                    weight,
                    rpm_limit,
                    rpd_limit,
                } => (value, name, weight, rpm_limit, rpd_limit),
            };
            match resolve_secret_value(&raw_value) {
                Ok(resolved) => credentials.push(ResolvedCredential {
                    provider_id: decl.id.clone(),
                    value: resolved,
                    name,
                    weight,
                    rpm_limit,
                    rpd_limit,
                }),
                Err(err) => warnings.push(format!(
                    "provider {:?}: dropping unreadable credential: {err}",
                    decl.id
                )),
            }
        }

        providers.insert(
            decl.id.clone(),
            rcc_provider_core::ProviderConfig {
                id: decl.id,
                protocol: decl.protocol,
                base_url: decl.base_url,
                extra_headers: decl.extra_headers,
                models: decl.models,
                count_tokens: decl.count_tokens,
            },
        );
    }

    Ok(LoadedConfig {
        providers,
        credentials,
        virtual_models: raw.virtual_models,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_string_api_key_is_shorthand_for_one_element_list() {
        let json = r#"{
            "providers": [
                {"id": "openai", "protocol": "open_ai_compatible", "base_url": "https://api.openai.com", "api_key": "sk-inline"}
            ],
            "virtualModels": []
        }"#;
        let dir = std::env::temp_dir().join(format!("rcc-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, json).unwrap();

        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded.credentials.len(), 1);
        assert_eq!(loaded.credentials[0].value, "sk-inline");
        assert_eq!(loaded.providers.len(), 1);
    }

    #[test]
    fn path_like_strings_are_read_from_disk() {
        assert!(looks_like_path("./secrets/openai.key"));
        assert!(looks_like_path("/etc/rcc/token.txt"));
        assert!(looks_like_path("../shared.pem"));
        assert!(!looks_like_path("sk-plain-inline-value"));
    }
}
