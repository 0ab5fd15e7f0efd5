use serde::{Deserialize, Serialize};

/// The three wire dialects RCC can speak northbound and southbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proto {
    Claude,
    OpenAi,
    Gemini,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    GenerateContent,
    ListModels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformContext {
    pub src: Proto,
    pub dst: Proto,
    pub op: Op,
}

/// How a dialect's streaming responses are framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    /// SSE with a named `event:` line per chunk (Anthropic).
    SseNamedEvent,
    /// SSE with only `data:` lines (OpenAI-compatible).
    SseDataOnly,
    /// Newline/JSON-array framed chunks with no SSE envelope (Gemini).
    JsonStream,
}

pub fn stream_format(proto: Proto) -> StreamFormat {
    match proto {
        Proto::Claude => StreamFormat::SseNamedEvent,
        Proto::OpenAi => StreamFormat::SseDataOnly,
        Proto::Gemini => StreamFormat::JsonStream,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("request body did not match the expected shape for {proto:?}: {reason}")]
    MalformedRequest { proto: Proto, reason: String },
    #[error("response body did not match the expected shape for {proto:?}: {reason}")]
    MalformedResponse { proto: Proto, reason: String },
    #[error("stream chunk could not be decoded for {proto:?}: {reason}")]
    MalformedStreamChunk { proto: Proto, reason: String },
}
