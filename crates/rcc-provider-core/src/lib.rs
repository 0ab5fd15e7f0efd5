//! Core provider abstractions: the adapter contract, credential pool, error
//! classification, and the event bus that feeds telemetry.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Adapter implementations construct [`UpstreamHttpRequest`] values;
//! a higher layer (or the adapter's own `invoke`) performs IO.

pub mod classification;
pub mod config;
pub mod credential;
pub mod error_shape;
pub mod errors;
pub mod events;
pub mod headers;
pub mod provider;
pub mod registry;
pub mod trace;

pub use classification::Classification;
pub use config::{
    CircuitBreakerConfig, CountTokensMode, CredentialSelector, LoadBalancingStrategy, ModelRecord,
    ProviderConfig, ProviderProtocol, RetryPolicy, Target, VirtualModelConfig,
};
pub use credential::{
    AcquireError, CredentialId, CredentialPool, ReleaseHandle, Secret, SelectionPolicy,
    SlotStatus, UnavailableReason,
};
pub use errors::{ProviderError, ProviderResult};
pub use events::{
    DownstreamEvent, Event, EventHub, EventSink, OperationalEvent, TerminalEventSink,
    UnavailableEndEvent, UnavailableStartEvent, UpstreamEvent,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use provider::{
    AdapterContext, HttpMethod, ModelCapabilities, ProviderAdapter, UnavailableDecision,
    UpstreamBody, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse,
};
pub use registry::AdapterRegistry;
pub use trace::{AttemptRecord, RequestOutcome, TraceRecord, TraceStore};
