//! Pipeline Assembler (C6, spec §4.6): a pure function from declared
//! virtual models and providers to the scheduler map the manager installs.
//! Never performs IO; target resolution failures are reported as
//! diagnostics rather than panics, so one bad target never takes down an
//! otherwise-healthy virtual model.

use std::collections::HashMap;
use std::sync::Arc;

use rcc_provider_core::{AdapterRegistry, CredentialPool, EventHub, ProviderConfig, VirtualModelConfig};

use crate::breaker::CircuitBreaker;
use crate::pipeline::Pipeline;
use crate::scheduler::{PipelinePool, PipelineScheduler};
use crate::upstream_client::UpstreamClient;

#[derive(Debug, Clone)]
pub struct AssemblyDiagnostic {
    pub virtual_model_id: String,
    pub message: String,
    /// A fatal diagnostic means the virtual model has no scheduler at all;
    /// a non-fatal one means it was assembled with fewer targets than
    /// declared.
    pub fatal: bool,
}

pub struct AssemblyResult {
    pub schedulers: HashMap<String, Arc<PipelineScheduler>>,
    pub diagnostics: Vec<AssemblyDiagnostic>,
}

/// Builds one `PipelineScheduler` per enabled virtual model (spec §4.6
/// `Assemble`). `default_max_in_flight` backstops any virtual model that
/// does not declare its own backpressure limit.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    virtual_models: &[VirtualModelConfig],
    providers: &HashMap<String, ProviderConfig>,
    registry: &AdapterRegistry,
    credentials: &Arc<CredentialPool>,
    client: &Arc<dyn UpstreamClient>,
    events: &EventHub,
    default_max_in_flight: usize,
) -> AssemblyResult {
    let mut schedulers = HashMap::new();
    let mut diagnostics = Vec::new();

    for vm in virtual_models {
        if !vm.enabled {
            diagnostics.push(AssemblyDiagnostic {
                virtual_model_id: vm.id.clone(),
                message: "virtual model disabled, no scheduler assembled".to_string(),
                fatal: false,
            });
            continue;
        }

        let mut pipelines = Vec::new();
        for target in vm.enabled_targets() {
            let Some(provider) = providers.get(&target.provider_id) else {
                diagnostics.push(AssemblyDiagnostic {
                    virtual_model_id: vm.id.clone(),
                    message: format!(
                        "target references unknown provider {:?}, dropped",
                        target.provider_id
                    ),
                    fatal: false,
                });
                continue;
            };

            let Some(adapter) = registry.get(provider.protocol) else {
                diagnostics.push(AssemblyDiagnostic {
                    virtual_model_id: vm.id.clone(),
                    message: format!(
                        "no adapter registered for provider {:?}'s protocol {:?}, dropped",
                        provider.id, provider.protocol
                    ),
                    fatal: false,
                });
                continue;
            };

            if provider.model(&target.model_id).is_none() {
                diagnostics.push(AssemblyDiagnostic {
                    virtual_model_id: vm.id.clone(),
                    message: format!(
                        "provider {:?} does not declare model {:?}; routing anyway since providers may serve undeclared models",
                        provider.id, target.model_id
                    ),
                    fatal: false,
                });
            }

            let breaker = CircuitBreaker::new(vm.circuit_breaker);
            let pipeline = Pipeline::new(
                vm.id.clone(),
                target.clone(),
                provider.clone(),
                adapter,
                credentials.clone(),
                breaker,
            );
            pipelines.push(Arc::new(pipeline));
        }

        if pipelines.is_empty() {
            diagnostics.push(AssemblyDiagnostic {
                virtual_model_id: vm.id.clone(),
                message: "no target resolved to an enabled pipeline; virtual model has no scheduler"
                    .to_string(),
                fatal: true,
            });
            continue;
        }

        let pool = PipelinePool::new(vm.id.clone(), pipelines, vm.strategy, vm.retry);
        let max_in_flight = vm.max_in_flight.unwrap_or(default_max_in_flight);
        let scheduler = PipelineScheduler::new(pool, client.clone(), events.clone(), max_in_flight);
        schedulers.insert(vm.id.clone(), scheduler);
    }

    AssemblyResult {
        schedulers,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcc_provider_core::{CountTokensMode, ProviderProtocol, Target};

    fn provider(id: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            protocol: ProviderProtocol::OpenAiCompatible,
            base_url: "https://api.example.com".to_string(),
            extra_headers: Vec::new(),
            models: vec![],
            count_tokens: CountTokensMode::Estimate,
        }
    }

    #[test]
    fn missing_provider_is_nonfatal_but_empty_pool_is_fatal() {
        let providers = HashMap::new();
        let registry = AdapterRegistry::new();
        let events = EventHub::new(16);
        let credentials = CredentialPool::new(events.clone());
        let client: Arc<dyn UpstreamClient> = Arc::new(crate::upstream_client::NoopClient);

        let vm = VirtualModelConfig {
            id: "default".to_string(),
            enabled: true,
            capabilities: vec![],
            targets: vec![Target {
                provider_id: "ghost".to_string(),
                model_id: "gpt".to_string(),
                credential_selector: Default::default(),
                weight: 1,
                enabled: true,
            }],
            strategy: Default::default(),
            retry: Default::default(),
            circuit_breaker: Default::default(),
            max_in_flight: None,
        };

        let result = assemble(
            &[vm],
            &providers,
            &registry,
            &credentials,
            &client,
            &events,
            50,
        );
        assert!(result.schedulers.is_empty());
        assert!(result.diagnostics.iter().any(|d| d.fatal));
        let _ = provider("unused");
    }
}
