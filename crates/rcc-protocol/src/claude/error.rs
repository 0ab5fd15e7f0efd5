use serde::{Deserialize, Serialize};

/// Anthropic's `{"type":"error","error":{"type":...,"message":...}}` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub error: ClaudeErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}
