/// Errors a provider adapter can raise while building a wire request or
/// interpreting its configuration. Upstream HTTP-level failures are not
/// represented here; see [`crate::classification::Classification`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),
    #[error("missing credential field: {0}")]
    MissingCredentialField(&'static str),
    #[error("request could not be expressed in this provider's protocol: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Other(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
