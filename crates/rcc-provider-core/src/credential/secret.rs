use serde::{Deserialize, Serialize};

/// Opaque upstream authentication material.
/// RCC never interprets this beyond placing it in the right southbound
/// header; it does not perform OAuth refresh or token exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Secret {
    ApiKey(String),
    Bearer(String),
    Structured(serde_json::Map<String, serde_json::Value>),
}

impl Secret {
    /// Used for ingest-time deduplication: two slots in one provider sharing
    /// identical secret material collapse to a single slot.
    pub fn fingerprint(&self) -> String {
        match self {
            Secret::ApiKey(key) => format!("api_key:{key}"),
            Secret::Bearer(token) => format!("bearer:{token}"),
            Secret::Structured(map) => {
                format!("structured:{}", serde_json::Value::Object(map.clone()))
            }
        }
    }
}
