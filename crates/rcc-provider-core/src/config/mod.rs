mod provider_config;
mod virtual_model;

pub use provider_config::{CountTokensMode, ModelRecord, ProviderConfig, ProviderProtocol};
pub use virtual_model::{
    CircuitBreakerConfig, CredentialSelector, LoadBalancingStrategy, RetryPolicy, Target,
    VirtualModelConfig,
};
