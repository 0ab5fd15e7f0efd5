//! Built-in upstream provider adapters.
//!
//! This crate does not perform network IO: each adapter's `prepare` builds
//! an `UpstreamHttpRequest` and leaves sending it to the shared transport in
//! `rcc-core`.

mod providers;

pub use providers::{AnthropicAdapter, GeminiAdapter, OpenAiCompatibleAdapter};

use std::sync::Arc;

use rcc_provider_core::AdapterRegistry;

/// Builds an [`AdapterRegistry`] populated with every dialect this crate
/// implements.
pub fn builtin_adapter_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(OpenAiCompatibleAdapter::new()));
    registry.register(Arc::new(AnthropicAdapter::new()));
    registry.register(Arc::new(GeminiAdapter::new()));
    registry
}
