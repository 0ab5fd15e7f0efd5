use serde::{Deserialize, Serialize};

/// iFlow's own error shape, distinct from the OpenAI-compatible envelope its
/// chat-completions endpoint otherwise mimics. The classifier in
/// `rcc-provider-core` tries this shape first for iFlow-family hosts before
/// falling back to [`crate::openai::error::OpenAiErrorBody`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IFlowErrorBody {
    pub message: String,
    pub error_code: i64,
}
