use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical internal shape every inbound request is normalized into before
/// the scheduler picks a pipeline, and every southbound response is
/// normalized back from. Modeled closely on Anthropic's Messages shape
/// since it is the richest of the three dialects RCC speaks; OpenAI and
/// Gemini requests/responses map onto a subset of these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRequest {
    /// The virtual-model id the client asked for, before routing.
    pub model: String,
    pub messages: Vec<NormalizedMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub role: NormalizedRole,
    pub blocks: Vec<NormalizedBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedBlock {
    Text { text: String },
    /// Extended-thinking / chain-of-thought content a provider surfaces
    /// alongside its answer (Claude's `thinking` blocks, OpenAI reasoning
    /// models' `reasoning_content`). Carried through the pipeline rather
    /// than discarded so it reaches the caller same as any other block.
    Thinking { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: Option<Value>, is_error: bool },
}

impl NormalizedMessage {
    pub fn text(role: NormalizedRole, text: impl Into<String>) -> Self {
        Self {
            role,
            blocks: vec![NormalizedBlock::Text { text: text.into() }],
        }
    }

    /// Concatenates all text blocks, dropping tool-use/tool-result blocks.
    /// Used by dialects (OpenAI plain-string content, Gemini `Part::text`)
    /// that cannot carry a block list verbatim.
    pub fn text_only(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                NormalizedBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub model: String,
    pub blocks: Vec<NormalizedBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub usage: NormalizedUsage,
}

/// Incremental delta emitted while streaming; accumulated by callers into a
/// [`NormalizedResponse`] the same way non-streaming calls return one
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NormalizedStreamEvent {
    Start { model: String },
    TextDelta { index: usize, text: String },
    ToolUseStart { index: usize, id: String, name: String },
    ToolUseInputDelta { index: usize, partial_json: String },
    BlockStop { index: usize },
    Done { stop_reason: Option<StopReason>, usage: NormalizedUsage },
}
