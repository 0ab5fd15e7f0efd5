use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::headers::{Headers, header_get};

/// The categorical outcome of one adapter invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Success,
    AuthFailure,
    RateLimited,
    TokenLimitExceeded,
    ServerError,
    NetworkError,
    Timeout,
    Malformed,
}

impl Classification {
    /// Classifications the scheduler will retry with a different pipeline.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Classification::RateLimited
                | Classification::ServerError
                | Classification::NetworkError
                | Classification::Timeout
        )
    }

    /// Classifications that should trip a pipeline's circuit breaker.
    /// Token-limit and malformed responses are model/request-specific, not
    /// pipeline-level faults.
    pub fn counts_toward_circuit_breaker(&self) -> bool {
        matches!(
            self,
            Classification::AuthFailure
                | Classification::ServerError
                | Classification::NetworkError
                | Classification::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Dns,
    Tls,
    Other,
}

const MIN_VALID_TOKEN_LIMIT: u64 = 1_000;
const MAX_VALID_TOKEN_LIMIT: u64 = 2_000_000;

static RATE_LIMIT_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate.?limit|too many requests|quota exceeded").expect("valid regex")
});

/// The three token-limit phrasings providers are known to use, each with
/// the numeric capture in the same position.
static TOKEN_LIMIT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)maximum context length (?:of|is) (\d+) tokens").expect("valid regex"),
        Regex::new(r"(?i)token[^0-9]{0,20}limit[^0-9]{0,20}(\d+)").expect("valid regex"),
        Regex::new(r"(?i)(\d+) tokens?\s*(?:limit|maximum)").expect("valid regex"),
    ]
});

/// Scans a provider's error message for one of the token-limit phrasings and
/// returns the extracted N if it falls within the valid range.
pub fn extract_token_limit(message: &str) -> Option<u64> {
    for pattern in TOKEN_LIMIT_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(message)
            && let Some(n) = captures.get(1).and_then(|m| m.as_str().parse::<u64>().ok())
            && (MIN_VALID_TOKEN_LIMIT..=MAX_VALID_TOKEN_LIMIT).contains(&n)
        {
            return Some(n);
        }
    }
    None
}

fn looks_rate_limited(body: &str) -> bool {
    RATE_LIMIT_PHRASE.is_match(body)
}

/// Classifies an HTTP response into the outcome categories a scheduler
/// acts on. `message` is the
/// provider's extracted error message (already unwrapped from whichever
/// error envelope shape applies, see [`crate::error_shape`]); pass an empty
/// string if the body could not be parsed under the provider's expected
/// shape, which yields `Malformed` for non-2xx statuses outside the
/// recognized ranges.
pub fn classify_http(status: u16, headers: &Headers, message: &str) -> Classification {
    if (200..300).contains(&status) {
        return Classification::Success;
    }
    if status == 401 || status == 403 {
        return Classification::AuthFailure;
    }
    if status == 429 || looks_rate_limited(message) {
        return Classification::RateLimited;
    }
    if status == 400 {
        if extract_token_limit(message).is_some() {
            return Classification::TokenLimitExceeded;
        }
        return Classification::Malformed;
    }
    if (500..600).contains(&status) {
        return Classification::ServerError;
    }
    let _ = header_get(headers, "retry-after");
    Classification::Malformed
}

pub fn classify_transport(kind: TransportErrorKind) -> Classification {
    match kind {
        TransportErrorKind::Timeout => Classification::Timeout,
        TransportErrorKind::Connect | TransportErrorKind::Dns | TransportErrorKind::Tls => {
            Classification::NetworkError
        }
        TransportErrorKind::Other => Classification::NetworkError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_limit_from_each_named_phrasing() {
        assert_eq!(
            extract_token_limit("This model's maximum context length is 131072 tokens"),
            Some(131072)
        );
        assert_eq!(
            extract_token_limit("token count limit of 8192 exceeded"),
            Some(8192)
        );
        assert_eq!(
            extract_token_limit("request has 200000 tokens maximum"),
            Some(200000)
        );
    }

    #[test]
    fn rejects_out_of_range_token_limits() {
        assert_eq!(extract_token_limit("maximum context length is 500 tokens"), None);
        assert_eq!(
            extract_token_limit("maximum context length is 5000000 tokens"),
            None
        );
    }

    #[test]
    fn classifies_auth_and_rate_limit_status_codes() {
        let headers: Headers = Vec::new();
        assert_eq!(classify_http(401, &headers, ""), Classification::AuthFailure);
        assert_eq!(classify_http(429, &headers, ""), Classification::RateLimited);
        assert_eq!(classify_http(503, &headers, ""), Classification::ServerError);
    }

    #[test]
    fn classifies_token_limit_exceeded_over_generic_bad_request() {
        let headers: Headers = Vec::new();
        let message = "maximum context length of 131072 tokens";
        assert_eq!(
            classify_http(400, &headers, message),
            Classification::TokenLimitExceeded
        );
        assert_eq!(classify_http(400, &headers, "bad json"), Classification::Malformed);
    }
}
