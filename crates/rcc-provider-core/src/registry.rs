use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderProtocol;
use crate::provider::ProviderAdapter;

/// Maps a wire dialect to the adapter that speaks it. There are exactly as
/// many entries as there are supported dialects; many providers share one
/// entry through their `ProviderConfig.base_url`.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    by_protocol: HashMap<ProviderProtocol, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.by_protocol.insert(adapter.protocol(), adapter);
    }

    pub fn get(&self, protocol: ProviderProtocol) -> Option<Arc<dyn ProviderAdapter>> {
        self.by_protocol.get(&protocol).cloned()
    }
}
