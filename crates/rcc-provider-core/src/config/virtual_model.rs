use serde::{Deserialize, Serialize};

/// How a [`Target`] picks a credential from its provider's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSelector {
    /// Any slot the pool's selection policy deems active.
    Any,
    /// A specific named slot; the target fails closed if that slot is
    /// missing, cooling, or blacklisted rather than falling back to `Any`.
    Named(String),
}

impl Default for CredentialSelector {
    fn default() -> Self {
        CredentialSelector::Any
    }
}

/// One `(provider, model, credential)` triple a virtual model can route to.
/// Assembled into exactly one [`crate::config::ProviderConfig`] lookup at
/// assembly time; unresolvable targets are dropped with a warning rather
/// than failing the whole virtual model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub provider_id: String,
    pub model_id: String,
    #[serde(default)]
    pub credential_selector: CredentialSelector,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Which pipeline gets picked for each new request against a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    Weighted,
    LeastLoaded,
    Failover,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::RoundRobin
    }
}

/// Per-pool retry policy (spec §4.4): re-selects a different pipeline on a
/// retryable classification, up to `max_attempts`, with exponential
/// backoff capped at `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Per-pool circuit breaker thresholds (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    300
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// A client-facing routing alias (`default`, `coding`, `longcontext`, ...)
/// mapping onto an ordered list of concrete targets. See spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualModelConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub targets: Vec<Target>,
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-scheduler maximum concurrent in-flight requests (spec §5
    /// Backpressure). `None` defers to the process-wide default.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

impl VirtualModelConfig {
    pub fn enabled_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.enabled)
    }
}
