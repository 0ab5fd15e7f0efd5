use rcc_protocol::claude::create_message::{CreateMessageRequestBody, CreateMessageResponse, StreamEvent};
use rcc_protocol::claude::types::{ContentBlock, Message, MessageContent, Role, Usage};

use crate::normalized::{
    NormalizedBlock, NormalizedMessage, NormalizedRequest, NormalizedResponse, NormalizedRole,
    NormalizedUsage, StopReason,
};
use crate::types::{Proto, TransformError};

/// Convert an inbound Anthropic Messages request into the gateway's
/// canonical shape.
pub fn to_normalized(request: CreateMessageRequestBody) -> Result<NormalizedRequest, TransformError> {
    let messages = request
        .messages
        .into_iter()
        .map(map_message_in)
        .collect();

    let system = request.system.map(|value| match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    });

    Ok(NormalizedRequest {
        model: request.model,
        messages,
        system,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop_sequences,
        stream: request.stream.unwrap_or(false),
        tools: request.tools,
        tool_choice: request.tool_choice,
    })
}

fn map_message_in(message: Message) -> NormalizedMessage {
    let role = match message.role {
        Role::User => NormalizedRole::User,
        Role::Assistant => NormalizedRole::Assistant,
    };
    let blocks = match message.content {
        MessageContent::Text(text) => vec![NormalizedBlock::Text { text }],
        MessageContent::Blocks(blocks) => blocks.into_iter().filter_map(map_block_in).collect(),
    };
    NormalizedMessage { role, blocks }
}

fn map_block_in(block: ContentBlock) -> Option<NormalizedBlock> {
    match block {
        ContentBlock::Text { text } => Some(NormalizedBlock::Text { text }),
        ContentBlock::Thinking { thinking } => Some(NormalizedBlock::Thinking { text: thinking }),
        ContentBlock::ToolUse { id, name, input } => {
            Some(NormalizedBlock::ToolUse { id, name, input })
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(NormalizedBlock::ToolResult {
            tool_use_id,
            content,
            is_error: is_error.unwrap_or(false),
        }),
        ContentBlock::Image { .. } => None,
    }
}

/// Convert a canonical response back into the Anthropic Messages shape
/// expected by a client that originally spoke Claude.
pub fn from_normalized(response: NormalizedResponse) -> Result<CreateMessageResponse, TransformError> {
    let content = response
        .blocks
        .into_iter()
        .map(map_block_out)
        .collect::<Vec<_>>();

    Ok(CreateMessageResponse {
        id: format!("msg_{}", uuid::Uuid::now_v7()),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: response.model,
        content,
        stop_reason: response.stop_reason.map(map_stop_reason_out),
        stop_sequence: None,
        usage: map_usage_out(response.usage),
    })
}

fn map_block_out(block: NormalizedBlock) -> ContentBlock {
    match block {
        NormalizedBlock::Text { text } => ContentBlock::Text { text },
        NormalizedBlock::Thinking { text } => ContentBlock::Thinking { thinking: text },
        NormalizedBlock::ToolUse { id, name, input } => ContentBlock::ToolUse { id, name, input },
        NormalizedBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error: Some(is_error),
        },
    }
}

fn map_stop_reason_out(reason: StopReason) -> String {
    match reason {
        StopReason::EndTurn => "end_turn",
        StopReason::MaxTokens => "max_tokens",
        StopReason::StopSequence => "stop_sequence",
        StopReason::ToolUse => "tool_use",
    }
    .to_string()
}

fn map_usage_out(usage: NormalizedUsage) -> Usage {
    Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    }
}

/// Builds the southbound Messages body for a provider speaking the
/// Anthropic dialect. The inverse of [`to_normalized`].
pub fn request_from_normalized(request: &NormalizedRequest) -> CreateMessageRequestBody {
    let messages = request
        .messages
        .iter()
        .map(|message| Message {
            role: match message.role {
                NormalizedRole::User => Role::User,
                NormalizedRole::Assistant => Role::Assistant,
            },
            content: MessageContent::Blocks(
                message.blocks.iter().cloned().map(map_block_out).collect(),
            ),
        })
        .collect();

    CreateMessageRequestBody {
        model: request.model.clone(),
        messages,
        system: request.system.clone().map(serde_json::Value::String),
        max_tokens: request.max_tokens.unwrap_or(4096),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stream: Some(request.stream),
        stop_sequences: request.stop_sequences.clone(),
        tools: request.tools.clone(),
        tool_choice: request.tool_choice.clone(),
    }
}

/// Converts a southbound non-streaming Messages response into the
/// canonical shape. The inverse of [`from_normalized`].
pub fn response_to_normalized(
    response: CreateMessageResponse,
) -> Result<NormalizedResponse, TransformError> {
    let blocks = response
        .content
        .into_iter()
        .filter_map(map_block_in)
        .collect();

    Ok(NormalizedResponse {
        model: response.model,
        blocks,
        stop_reason: response.stop_reason.as_deref().map(map_stop_reason_in),
        usage: NormalizedUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        },
    })
}

fn map_stop_reason_in(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

/// Converts one parsed Anthropic SSE event into zero or more canonical
/// stream events.
pub fn stream_event_to_normalized(
    event: StreamEvent,
) -> Vec<crate::normalized::NormalizedStreamEvent> {
    use crate::normalized::NormalizedStreamEvent;

    match event {
        StreamEvent::MessageStart { message } => vec![NormalizedStreamEvent::Start {
            model: message.model,
        }],
        StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::ToolUse { id, name, .. },
        } => vec![NormalizedStreamEvent::ToolUseStart { index, id, name }],
        StreamEvent::ContentBlockStart { .. } => Vec::new(),
        StreamEvent::ContentBlockDelta { index, delta } => {
            if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                vec![NormalizedStreamEvent::TextDelta {
                    index,
                    text: text.to_string(),
                }]
            } else if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                vec![NormalizedStreamEvent::ToolUseInputDelta {
                    index,
                    partial_json: partial.to_string(),
                }]
            } else {
                Vec::new()
            }
        }
        StreamEvent::ContentBlockStop { index } => vec![NormalizedStreamEvent::BlockStop { index }],
        StreamEvent::MessageDelta { delta, usage } => {
            let stop_reason = delta
                .get("stop_reason")
                .and_then(|v| v.as_str())
                .map(map_stop_reason_in);
            vec![NormalizedStreamEvent::Done {
                stop_reason,
                usage: NormalizedUsage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                },
            }]
        }
        StreamEvent::MessageStop | StreamEvent::Ping | StreamEvent::Error { .. } => Vec::new(),
    }
}

pub const PROTO: Proto = Proto::Claude;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_plain_text_message() {
        let request = CreateMessageRequestBody {
            model: "claude-sonnet".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("hello".to_string()),
            }],
            system: None,
            max_tokens: 100,
            temperature: None,
            top_p: None,
            top_k: None,
            stream: Some(false),
            stop_sequences: None,
            tools: None,
            tool_choice: None,
        };
        let normalized = to_normalized(request).unwrap();
        assert_eq!(normalized.messages.len(), 1);
        assert_eq!(normalized.messages[0].text_only(), "hello");
    }
}
