use serde::{Deserialize, Serialize};

/// Gemini's `{"error":{"code","message","status"}}` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiErrorBody {
    pub error: GeminiErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiErrorDetail {
    pub code: i64,
    pub message: String,
    pub status: String,
}
