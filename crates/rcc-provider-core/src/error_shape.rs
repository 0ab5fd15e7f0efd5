use rcc_protocol::claude::error::ClaudeErrorBody;
use rcc_protocol::gemini::error::GeminiErrorBody;
use rcc_protocol::iflow::IFlowErrorBody;
use rcc_protocol::openai::error::OpenAiErrorBody;

/// Hostnames matching this family use iFlow's own `{message, error_code}`
/// error envelope rather than the OpenAI-compatible one their chat
/// completions endpoint otherwise mimics.
pub fn is_iflow_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("apis.iflow.cn") || host.to_ascii_lowercase().ends_with(".iflow.cn")
}

/// Extracts a human-readable error message from a southbound error body,
/// trying the shape appropriate to the host first and falling back to the
/// OpenAI-compatible shape. Returns `None` if the body matches neither
/// shape, which the caller should treat as `Malformed`.
pub fn extract_message(host: &str, body: &[u8]) -> Option<String> {
    if is_iflow_host(host)
        && let Ok(iflow) = serde_json::from_slice::<IFlowErrorBody>(body)
    {
        return Some(iflow.message);
    }
    if let Ok(openai) = serde_json::from_slice::<OpenAiErrorBody>(body) {
        return Some(openai.error.message);
    }
    if let Ok(claude) = serde_json::from_slice::<ClaudeErrorBody>(body) {
        return Some(claude.error.message);
    }
    if let Ok(gemini) = serde_json::from_slice::<GeminiErrorBody>(body) {
        return Some(gemini.error.message);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_iflow_shape_for_iflow_hosts() {
        let body = br#"{"message":"rate limited","error_code":429}"#;
        assert_eq!(
            extract_message("apis.iflow.cn", body),
            Some("rate limited".to_string())
        );
    }

    #[test]
    fn falls_back_to_openai_shape_for_other_hosts() {
        let body = br#"{"error":{"message":"bad request","type":"invalid_request_error"}}"#;
        assert_eq!(
            extract_message("api.openai.com", body),
            Some("bad request".to_string())
        );
    }
}
