use rcc_protocol::openai::create_chat_completions::{
    ChatCompletionChoice, ChatCompletionChunkChoice, ChatCompletionChunkDelta,
    CreateChatCompletionsChunk, CreateChatCompletionsRequestBody, CreateChatCompletionsResponse,
};
use rcc_protocol::openai::types::{ChatMessage, Role, Usage};

use crate::normalized::{
    NormalizedBlock, NormalizedMessage, NormalizedRequest, NormalizedResponse, NormalizedRole,
    NormalizedUsage, StopReason,
};
use crate::types::{Proto, TransformError};

pub fn to_normalized(
    request: CreateChatCompletionsRequestBody,
) -> Result<NormalizedRequest, TransformError> {
    let mut system = None;
    let mut messages = Vec::with_capacity(request.messages.len());

    for message in request.messages {
        let text = message_text(&message)?;
        match message.role {
            Role::System => {
                system = Some(match system {
                    Some(existing) => format!("{existing}\n{text}"),
                    None => text,
                });
            }
            Role::User => messages.push(NormalizedMessage::text(NormalizedRole::User, text)),
            Role::Assistant => {
                messages.push(NormalizedMessage::text(NormalizedRole::Assistant, text))
            }
            Role::Tool => {
                let tool_use_id = message.tool_call_id.ok_or_else(|| {
                    TransformError::MalformedRequest {
                        proto: Proto::OpenAi,
                        reason: "tool message missing tool_call_id".to_string(),
                    }
                })?;
                messages.push(NormalizedMessage {
                    role: NormalizedRole::User,
                    blocks: vec![NormalizedBlock::ToolResult {
                        tool_use_id,
                        content: Some(serde_json::Value::String(text)),
                        is_error: false,
                    }],
                });
            }
        }
    }

    Ok(NormalizedRequest {
        model: request.model,
        messages,
        system,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: match request.stop {
            Some(serde_json::Value::String(s)) => Some(vec![s]),
            Some(serde_json::Value::Array(values)) => Some(
                values
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        },
        stream: request.stream.unwrap_or(false),
        tools: request.tools,
        tool_choice: request.tool_choice,
    })
}

fn message_text(message: &ChatMessage) -> Result<String, TransformError> {
    match &message.content {
        Some(serde_json::Value::String(text)) => Ok(text.clone()),
        Some(serde_json::Value::Array(parts)) => Ok(parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n")),
        Some(other) => Ok(other.to_string()),
        None => Ok(String::new()),
    }
}

pub fn from_normalized(
    response: NormalizedResponse,
) -> Result<CreateChatCompletionsResponse, TransformError> {
    let text = response
        .blocks
        .iter()
        .filter_map(|block| match block {
            NormalizedBlock::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    let reasoning_content = reasoning_from_blocks(&response.blocks);

    let message = ChatMessage {
        role: Role::Assistant,
        content: Some(serde_json::Value::String(text)),
        name: None,
        tool_calls: tool_calls_from_blocks(&response.blocks),
        tool_call_id: None,
        reasoning_content,
    };

    Ok(CreateChatCompletionsResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::now_v7()),
        object: "chat.completion".to_string(),
        created: 0,
        model: response.model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message,
            finish_reason: Some(map_finish_reason(response.stop_reason)),
        }],
        usage: Usage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        },
    })
}

fn reasoning_from_blocks(blocks: &[NormalizedBlock]) -> Option<String> {
    let text = blocks
        .iter()
        .filter_map(|block| match block {
            NormalizedBlock::Thinking { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() { None } else { Some(text) }
}

fn tool_calls_from_blocks(blocks: &[NormalizedBlock]) -> Option<serde_json::Value> {
    let calls: Vec<serde_json::Value> = blocks
        .iter()
        .filter_map(|block| match block {
            NormalizedBlock::ToolUse { id, name, input } => Some(serde_json::json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": input.to_string(),
                },
            })),
            _ => None,
        })
        .collect();
    if calls.is_empty() {
        None
    } else {
        Some(serde_json::Value::Array(calls))
    }
}

fn map_finish_reason(reason: Option<StopReason>) -> String {
    match reason {
        Some(StopReason::EndTurn) | None => "stop",
        Some(StopReason::MaxTokens) => "length",
        Some(StopReason::StopSequence) => "stop",
        Some(StopReason::ToolUse) => "tool_calls",
    }
    .to_string()
}

/// Builds the southbound chat-completions body for a provider speaking the
/// OpenAI-compatible dialect. The inverse of [`to_normalized`]: used when
/// dispatching a request that did not necessarily arrive as OpenAI-shaped.
pub fn request_from_normalized(request: &NormalizedRequest) -> CreateChatCompletionsRequestBody {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(ChatMessage {
            role: Role::System,
            content: Some(serde_json::Value::String(system.clone())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
        });
    }
    for message in &request.messages {
        let role = match message.role {
            crate::normalized::NormalizedRole::User => Role::User,
            crate::normalized::NormalizedRole::Assistant => Role::Assistant,
        };
        messages.push(ChatMessage {
            role,
            content: Some(serde_json::Value::String(message.text_only())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: reasoning_from_blocks(&message.blocks),
        });
    }

    CreateChatCompletionsRequestBody {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stream: Some(request.stream),
        stop: request
            .stop_sequences
            .clone()
            .map(|seqs| serde_json::Value::Array(seqs.into_iter().map(serde_json::Value::String).collect())),
        tools: request.tools.clone(),
        tool_choice: request.tool_choice.clone(),
    }
}

/// Converts a southbound non-streaming chat-completions response into the
/// canonical shape. The inverse of [`from_normalized`].
pub fn response_to_normalized(
    response: CreateChatCompletionsResponse,
) -> Result<NormalizedResponse, TransformError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransformError::MalformedResponse {
            proto: Proto::OpenAi,
            reason: "chat completion had no choices".to_string(),
        })?;

    let mut blocks = Vec::new();
    if let Some(text) = choice.message.reasoning_content {
        if !text.is_empty() {
            blocks.push(NormalizedBlock::Thinking { text });
        }
    }
    if let Some(serde_json::Value::String(text)) = choice.message.content {
        if !text.is_empty() {
            blocks.push(NormalizedBlock::Text { text });
        }
    }
    if let Some(serde_json::Value::Array(calls)) = choice.message.tool_calls {
        for call in calls {
            let id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let function = call.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let input = function
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null);
            blocks.push(NormalizedBlock::ToolUse { id, name, input });
        }
    }

    Ok(NormalizedResponse {
        model: response.model,
        blocks,
        stop_reason: choice.finish_reason.as_deref().map(map_finish_reason_in),
        usage: NormalizedUsage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
        },
    })
}

fn map_finish_reason_in(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" => StopReason::ToolUse,
        "stop" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// Converts one `data:` payload of a southbound chat-completions stream
/// into canonical stream events. Returns an empty vec for control lines
/// such as `[DONE]`.
pub fn stream_chunk_to_normalized(
    chunk: &CreateChatCompletionsChunk,
) -> Vec<crate::normalized::NormalizedStreamEvent> {
    use crate::normalized::NormalizedStreamEvent;

    let mut events = Vec::new();
    for choice in &chunk.choices {
        let ChatCompletionChunkChoice {
            index,
            delta,
            finish_reason,
        } = choice;
        let ChatCompletionChunkDelta { content, .. } = delta;
        if let Some(text) = content {
            events.push(NormalizedStreamEvent::TextDelta {
                index: *index as usize,
                text: text.clone(),
            });
        }
        if let Some(reason) = finish_reason {
            events.push(NormalizedStreamEvent::Done {
                stop_reason: Some(map_finish_reason_in(reason)),
                usage: chunk
                    .usage
                    .clone()
                    .map(|u| NormalizedUsage {
                        input_tokens: u.prompt_tokens,
                        output_tokens: u.completion_tokens,
                    })
                    .unwrap_or_default(),
            });
        }
    }
    events
}

pub const PROTO: Proto = Proto::OpenAi;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_consecutive_system_messages() {
        let request = CreateChatCompletionsRequestBody {
            model: "gpt-4o-mini".to_string(),
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: Some(serde_json::Value::String("be terse".to_string())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                    reasoning_content: None,
                },
                ChatMessage {
                    role: Role::User,
                    content: Some(serde_json::Value::String("hi".to_string())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                    reasoning_content: None,
                },
            ],
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: None,
            stop: None,
            tools: None,
            tool_choice: None,
        };
        let normalized = to_normalized(request).unwrap();
        assert_eq!(normalized.system.as_deref(), Some("be terse"));
        assert_eq!(normalized.messages.len(), 1);
    }
}
