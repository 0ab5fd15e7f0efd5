use rcc_protocol::gemini::generate_content::{Candidate, GenerateContentRequestBody, GenerateContentResponse};
use rcc_protocol::gemini::types::{Content, GenerationConfig, Part, Role, UsageMetadata};

use crate::normalized::{
    NormalizedBlock, NormalizedMessage, NormalizedRequest, NormalizedResponse, NormalizedRole,
    NormalizedUsage, StopReason,
};
use crate::types::Proto;
use crate::types::TransformError;

pub fn to_normalized(request: GenerateContentRequestBody) -> Result<NormalizedRequest, TransformError> {
    let messages = request.contents.into_iter().map(map_content_in).collect();

    let system = request.system_instruction.map(|content| {
        content
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("\n")
    });

    let config = request.generation_config.unwrap_or_default();

    Ok(NormalizedRequest {
        model: String::new(),
        messages,
        system,
        max_tokens: config.max_output_tokens,
        temperature: config.temperature,
        top_p: config.top_p,
        stop_sequences: config.stop_sequences,
        stream: false,
        tools: request.tools,
        tool_choice: None,
    })
}

fn map_content_in(content: Content) -> NormalizedMessage {
    let role = match content.role {
        Some(Role::Model) => NormalizedRole::Assistant,
        Some(Role::User) | None => NormalizedRole::User,
    };
    let blocks = content
        .parts
        .into_iter()
        .filter_map(map_part_in)
        .collect();
    NormalizedMessage { role, blocks }
}

fn map_part_in(part: Part) -> Option<NormalizedBlock> {
    if let Some(text) = part.text {
        return Some(NormalizedBlock::Text { text });
    }
    if let Some(call) = part.function_call {
        let name = call.get("name").and_then(|v| v.as_str())?.to_string();
        let input = call.get("args").cloned().unwrap_or(serde_json::Value::Null);
        return Some(NormalizedBlock::ToolUse {
            id: name.clone(),
            name,
            input,
        });
    }
    None
}

pub fn from_normalized(response: NormalizedResponse) -> Result<GenerateContentResponse, TransformError> {
    let parts = response
        .blocks
        .iter()
        .filter_map(|block| match block {
            NormalizedBlock::Text { text } => Some(Part {
                text: Some(text.clone()),
                inline_data: None,
                function_call: None,
                function_response: None,
            }),
            NormalizedBlock::ToolUse { name, input, .. } => Some(Part {
                text: None,
                inline_data: None,
                function_call: Some(serde_json::json!({"name": name, "args": input})),
                function_response: None,
            }),
            NormalizedBlock::ToolResult { .. } => None,
            // Gemini's wire format has no reasoning/thought field to round-trip
            // through; dropped here the same as a tool result block.
            NormalizedBlock::Thinking { .. } => None,
        })
        .collect();

    Ok(GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content {
                role: Some(Role::Model),
                parts,
            },
            finish_reason: Some(map_finish_reason(response.stop_reason)),
            index: 0,
        }],
        usage_metadata: map_usage_out(response.usage),
        model_version: Some(response.model),
    })
}

fn map_finish_reason(reason: Option<StopReason>) -> String {
    match reason {
        Some(StopReason::EndTurn) | None => "STOP",
        Some(StopReason::MaxTokens) => "MAX_TOKENS",
        Some(StopReason::StopSequence) => "STOP",
        Some(StopReason::ToolUse) => "STOP",
    }
    .to_string()
}

fn map_usage_out(usage: NormalizedUsage) -> UsageMetadata {
    UsageMetadata {
        prompt_token_count: usage.input_tokens,
        candidates_token_count: usage.output_tokens,
        total_token_count: usage.input_tokens + usage.output_tokens,
    }
}

/// Gemini's model id travels in the URL path (`/v1beta/models/{model}:generateContent`),
/// not the body; callers fill [`crate::normalized::NormalizedRequest::model`]
/// from the path segment after calling [`to_normalized`].
pub fn with_model(mut request: NormalizedRequest, model: String) -> NormalizedRequest {
    request.model = model;
    request
}

/// Builds the southbound generateContent body for a provider speaking the
/// Gemini dialect. The inverse of [`to_normalized`]; the model id is not
/// part of this body (it travels in the URL) so callers drop
/// `request.model` on the floor here.
pub fn request_from_normalized(request: &NormalizedRequest) -> GenerateContentRequestBody {
    let contents = request
        .messages
        .iter()
        .map(|message| Content {
            role: Some(match message.role {
                NormalizedRole::User => Role::User,
                NormalizedRole::Assistant => Role::Model,
            }),
            parts: vec![Part {
                text: Some(message.text_only()),
                inline_data: None,
                function_call: None,
                function_response: None,
            }],
        })
        .collect();

    let system_instruction = request.system.as_ref().map(|text| Content {
        role: None,
        parts: vec![Part {
            text: Some(text.clone()),
            inline_data: None,
            function_call: None,
            function_response: None,
        }],
    });

    GenerateContentRequestBody {
        contents,
        system_instruction,
        generation_config: Some(GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: None,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop_sequences.clone(),
        }),
        tools: request.tools.clone(),
    }
}

/// Converts a southbound non-streaming generateContent response into the
/// canonical shape. The inverse of [`from_normalized`]; `model` is filled
/// by the caller since Gemini responses don't always echo it back.
pub fn response_to_normalized(
    response: GenerateContentResponse,
    model: String,
) -> Result<NormalizedResponse, TransformError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| TransformError::MalformedResponse {
            proto: Proto::Gemini,
            reason: "generateContent response had no candidates".to_string(),
        })?;

    let blocks = candidate
        .content
        .parts
        .into_iter()
        .filter_map(map_part_in)
        .collect();

    Ok(NormalizedResponse {
        model: response.model_version.unwrap_or(model),
        blocks,
        stop_reason: candidate.finish_reason.as_deref().map(map_finish_reason_in),
        usage: NormalizedUsage {
            input_tokens: response.usage_metadata.prompt_token_count,
            output_tokens: response.usage_metadata.candidates_token_count,
        },
    })
}

fn map_finish_reason_in(reason: &str) -> StopReason {
    match reason {
        "MAX_TOKENS" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

/// Converts one streamed generateContent response chunk into canonical
/// stream events. Gemini's stream carries full-candidate snapshots rather
/// than deltas for tool calls, so a chunk with a function call yields a
/// `ToolUseStart` with the full arguments already attached.
pub fn stream_chunk_to_normalized(
    chunk: GenerateContentResponse,
) -> Vec<crate::normalized::NormalizedStreamEvent> {
    use crate::normalized::NormalizedStreamEvent;

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for (index, part) in candidate.content.parts.into_iter().enumerate() {
        if let Some(text) = part.text {
            events.push(NormalizedStreamEvent::TextDelta { index, text });
        } else if let Some(call) = part.function_call {
            if let Some(name) = call.get("name").and_then(|v| v.as_str()) {
                events.push(NormalizedStreamEvent::ToolUseStart {
                    index,
                    id: name.to_string(),
                    name: name.to_string(),
                });
            }
        }
    }
    if candidate.finish_reason.is_some() {
        events.push(NormalizedStreamEvent::Done {
            stop_reason: candidate.finish_reason.as_deref().map(map_finish_reason_in),
            usage: NormalizedUsage {
                input_tokens: chunk.usage_metadata.prompt_token_count,
                output_tokens: chunk.usage_metadata.candidates_token_count,
            },
        });
    }
    events
}

pub const PROTO: Proto = Proto::Gemini;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_model_role_to_assistant() {
        let request = GenerateContentRequestBody {
            contents: vec![Content {
                role: Some(Role::Model),
                parts: vec![Part {
                    text: Some("hi".to_string()),
                    inline_data: None,
                    function_call: None,
                    function_response: None,
                }],
            }],
            system_instruction: None,
            generation_config: None,
            tools: None,
        };
        let normalized = to_normalized(request).unwrap();
        assert_eq!(normalized.messages[0].role, NormalizedRole::Assistant);
    }
}
