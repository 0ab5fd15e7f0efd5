//! The §7 error-kind table: every disposition a request can have once it
//! leaves the scheduler/manager, each carrying the request id for
//! correlation with its trace record.

use rcc_provider_core::Classification;

/// One machine-readable kind, each mapped to exactly one HTTP status by
/// `rcc-router`. Internal invariants panic in debug builds and are caught
/// at the HTTP handler boundary; they never propagate as a different kind.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("request {request_id} failed normalization: {reason}")]
    BadRequest { request_id: String, reason: String },

    #[error("request {request_id} named unknown virtual model {virtual_model_id:?}")]
    UnknownVirtualModel {
        request_id: String,
        virtual_model_id: String,
    },

    #[error("request {request_id} found no available targets for {virtual_model_id:?}")]
    NoAvailableTargets {
        request_id: String,
        virtual_model_id: String,
    },

    #[error("request {request_id} exhausted all targets; last failure: {last_category:?}")]
    AllTargetsFailed {
        request_id: String,
        last_category: Classification,
    },

    #[error("request {request_id}: every credential slot for provider {provider_id} is cooling or blacklisted")]
    AuthExhausted {
        request_id: String,
        provider_id: String,
    },

    #[error("request {request_id} exceeds the upstream context window{}", detected_limit.map(|n| format!(" ({n} tokens)")).unwrap_or_default())]
    TokenLimitExceeded {
        request_id: String,
        detected_limit: Option<u64>,
    },

    #[error("request {request_id} rejected: scheduler at max concurrency")]
    Overloaded { request_id: String },

    #[error("request {request_id} timed out waiting on upstream")]
    UpstreamTimeout { request_id: String },

    #[error("internal invariant violated while handling {request_id}: {detail}")]
    InternalInvariant { request_id: String, detail: String },

    #[error("request {request_id} cancelled by caller")]
    Cancelled { request_id: String },
}

impl CoreError {
    /// Stable machine-readable code, returned in the error body alongside
    /// the human-readable message.
    pub fn kind_code(&self) -> &'static str {
        match self {
            CoreError::BadRequest { .. } => "bad_request",
            CoreError::UnknownVirtualModel { .. } => "unknown_virtual_model",
            CoreError::NoAvailableTargets { .. } => "no_available_targets",
            CoreError::AllTargetsFailed { .. } => "all_targets_failed",
            CoreError::AuthExhausted { .. } => "auth_exhausted",
            CoreError::TokenLimitExceeded { .. } => "token_limit_exceeded",
            CoreError::Overloaded { .. } => "overloaded",
            CoreError::UpstreamTimeout { .. } => "upstream_timeout",
            CoreError::InternalInvariant { .. } => "internal_invariant",
            CoreError::Cancelled { .. } => "cancelled",
        }
    }

    /// The HTTP status `rcc-router` should map this kind to (spec §7).
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::BadRequest { .. } => 400,
            CoreError::UnknownVirtualModel { .. } => 404,
            CoreError::NoAvailableTargets { .. } => 503,
            CoreError::AllTargetsFailed { .. } => 502,
            CoreError::AuthExhausted { .. } => 502,
            CoreError::TokenLimitExceeded { .. } => 413,
            CoreError::Overloaded { .. } => 503,
            CoreError::UpstreamTimeout { .. } => 504,
            CoreError::InternalInvariant { .. } => 500,
            CoreError::Cancelled { .. } => 499,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            CoreError::BadRequest { request_id, .. }
            | CoreError::UnknownVirtualModel { request_id, .. }
            | CoreError::NoAvailableTargets { request_id, .. }
            | CoreError::AllTargetsFailed { request_id, .. }
            | CoreError::AuthExhausted { request_id, .. }
            | CoreError::TokenLimitExceeded { request_id, .. }
            | CoreError::Overloaded { request_id }
            | CoreError::UpstreamTimeout { request_id }
            | CoreError::InternalInvariant { request_id, .. }
            | CoreError::Cancelled { request_id } => request_id,
        }
    }
}
