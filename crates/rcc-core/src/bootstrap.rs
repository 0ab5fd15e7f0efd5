//! Process bootstrap (spec §6): CLI/env parsing into `GlobalConfig`,
//! loading the provider/virtual-model configuration file, ingesting
//! credentials, assembling the scheduler map, and handing back everything
//! `apps/rcc::main` needs to start serving.
//!
//! This crate does not depend on `rcc-storage`, so the durable trace store
//! (if any) is constructed by the caller and handed in; `bootstrap` only
//! wires it into the `Tracker`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rcc_common::{GlobalConfig, GlobalConfigPatch};
use rcc_provider_core::trace::TraceStore;
use rcc_provider_core::{CredentialPool, EventHub, Secret};
use tracing::{debug, warn};

use crate::assembler::assemble;
use crate::config::load_from_path;
use crate::manager::Manager;
use crate::tracker::Tracker;
use crate::upstream_client::UpstreamClient;

#[derive(Parser, Debug)]
#[command(name = "rcc", about = "Route Claude Code: a routing gateway over heterogeneous LLM providers")]
pub struct Cli {
    /// Path to the provider/virtual-model configuration JSON file (spec §6).
    #[arg(long, env = "RCC_CONFIG")]
    pub config: PathBuf,
    #[arg(long, env = "RCC_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "RCC_PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "RCC_AUTH_TOKEN")]
    pub auth_token: Option<String>,
    #[arg(long, env = "RCC_PROXY")]
    pub proxy: Option<String>,
    #[arg(long, env = "RCC_DSN")]
    pub dsn: Option<String>,
    #[arg(long, env = "RCC_MAX_IN_FLIGHT")]
    pub default_max_in_flight: Option<usize>,
    #[arg(long, env = "RCC_SHUTDOWN_DEADLINE_SECS")]
    pub shutdown_deadline_secs: Option<u64>,
}

impl Cli {
    fn into_parts(self) -> (PathBuf, GlobalConfigPatch) {
        let patch = GlobalConfigPatch {
            host: self.host,
            port: self.port,
            auth_token: self.auth_token.map(Some),
            proxy: self.proxy,
            dsn: self.dsn,
            event_redact_sensitive: None,
            default_max_in_flight: self.default_max_in_flight,
            shutdown_deadline_secs: self.shutdown_deadline_secs,
        };
        (self.config, patch)
    }
}

/// Everything `apps/rcc::main` needs to start serving: the resolved
/// process config, the live `Manager`, and any non-fatal problems found
/// while loading (surfaced in logs, not fatal to startup).
pub struct Bootstrap {
    pub global: GlobalConfig,
    pub manager: Arc<Manager>,
    pub warnings: Vec<String>,
}

/// Parses CLI/env (CLI > env > defaults), loads the provider configuration
/// file, ingests its credentials into a fresh `CredentialPool`, assembles
/// the scheduler map (C6), and constructs the `Manager` (C5) wired to a
/// `Tracker` (C8). `client` is the shared upstream transport; `store` is
/// the durable trace sink, built by the caller since `rcc-core` has no
/// dependency on `rcc-storage`.
pub async fn bootstrap(
    client: Arc<dyn UpstreamClient>,
    store: Option<Arc<dyn TraceStore>>,
) -> anyhow::Result<Bootstrap> {
    let cli = Cli::parse();
    bootstrap_with_cli(cli, client, store).await
}

/// Same as [`bootstrap`] but takes an already-parsed `Cli` instead of
/// reading `std::env`/`std::env::args` itself — the entry point for a
/// caller (`apps/rcc`) that needs to resolve values such as a
/// data-dir-relative DSN before the rest of the config is assembled.
pub async fn bootstrap_with_cli(
    cli: Cli,
    client: Arc<dyn UpstreamClient>,
    store: Option<Arc<dyn TraceStore>>,
) -> anyhow::Result<Bootstrap> {
    let (config_path, patch) = cli.into_parts();
    let global = patch.into_config()?;

    let loaded = load_from_path(&config_path)?;
    for warning in &loaded.warnings {
        warn!("{warning}");
    }

    let events = EventHub::new(1024);
    let credentials = CredentialPool::new(events.clone());
    for cred in &loaded.credentials {
        credentials
            .insert_named(
                cred.provider_id.clone(),
                cred.name.clone(),
                Secret::ApiKey(cred.value.clone()),
                cred.weight,
                cred.rpm_limit,
                cred.rpd_limit,
            )
            .await;
    }

    let registry = rcc_provider_impl::builtin_adapter_registry();
    let assembled = assemble(
        &loaded.virtual_models,
        &loaded.providers,
        &registry,
        &credentials,
        &client,
        &events,
        global.default_max_in_flight,
    );
    for diagnostic in &assembled.diagnostics {
        if diagnostic.fatal {
            warn!(virtual_model_id = %diagnostic.virtual_model_id, message = %diagnostic.message, "virtual model has no scheduler");
        } else {
            debug!(virtual_model_id = %diagnostic.virtual_model_id, message = %diagnostic.message, "assembly diagnostic");
        }
    }

    // Spec §4.6: "Report success=true iff at least one PipelinePool has at
    // least one enabled Pipeline ... the Manager must refuse to enter
    // serving state when success=false." A process with zero assembled
    // schedulers has nothing to route and should fail startup (exit code 1),
    // not come up and 404 every request.
    if assembled.schedulers.is_empty() {
        anyhow::bail!(
            "assembly produced no schedulers: every virtual model failed to resolve at least one enabled pipeline"
        );
    }

    let tracker = Tracker::new(events, store);
    let manager = Arc::new(Manager::new(assembled.schedulers, tracker));

    let mut warnings = loaded.warnings;
    warnings.extend(
        assembled
            .diagnostics
            .iter()
            .map(|d| format!("{}: {}", d.virtual_model_id, d.message)),
    );

    Ok(Bootstrap {
        global,
        manager,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_config_file_fails_fast() {
        let cli = Cli {
            config: PathBuf::from("/nonexistent/rcc-bootstrap-test.json"),
            host: None,
            port: None,
            auth_token: None,
            proxy: None,
            dsn: Some("sqlite::memory:".to_string()),
            default_max_in_flight: None,
            shutdown_deadline_secs: None,
        };
        let client: Arc<dyn UpstreamClient> = Arc::new(crate::upstream_client::NoopClient);
        let result = bootstrap_with_cli(cli, client, None).await;
        assert!(result.is_err());
    }
}
