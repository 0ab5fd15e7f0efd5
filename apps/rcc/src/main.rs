//! Process entry point (spec §6): parses CLI/env, resolves the trace-store
//! DSN, bootstraps the routing core, serves the northbound HTTP surface,
//! and drains in-flight requests on SIGINT/SIGTERM before exiting.
//!
//! The configuration-editing admin UI the teacher bundled into this same
//! binary is deliberately not reproduced here — spec §1/§9 treat it as an
//! external collaborator the routing core does not own.

mod cli;
mod data_dir;
mod dsn;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rcc_core::upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
use rcc_provider_core::trace::TraceStore;
use rcc_storage::SeaOrmTraceStore;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(%info, "internal invariant violation; exiting");
        // Spec §6 exit code 2: "runtime invariant violation". Unlike a bare
        // panic=abort, this gives operators a distinct code from a fatal
        // startup failure (1) or a normal shutdown (0).
        std::process::exit(2);
    }));

    let cli = Cli::parse();
    let data_dir = data_dir::resolve_data_dir(&cli.data_dir);
    let resolved_dsn =
        dsn::resolve_dsn(&cli.dsn, &data_dir).map_err(|err| anyhow::anyhow!(err.to_string()))?;

    let core_cli = rcc_core::Cli {
        config: cli.config.clone(),
        host: Some(cli.host.clone()),
        port: Some(cli.port),
        auth_token: cli.auth_token.clone(),
        proxy: cli.proxy.clone(),
        dsn: Some(resolved_dsn.clone()),
        default_max_in_flight: cli.default_max_in_flight,
        shutdown_deadline_secs: cli.shutdown_deadline_secs,
    };

    let upstream_cfg = UpstreamClientConfig {
        proxy: cli.proxy.clone(),
        ..UpstreamClientConfig::default()
    };
    let client: Arc<dyn UpstreamClient> =
        Arc::new(WreqUpstreamClient::new(upstream_cfg).context("building upstream HTTP client")?);

    let store: Arc<dyn TraceStore> = Arc::new(
        SeaOrmTraceStore::connect(&resolved_dsn)
            .await
            .context("connecting trace store")?,
    );

    let boot = rcc_core::bootstrap::bootstrap_with_cli(core_cli, client, Some(store))
        .await
        .context("bootstrapping routing core")?;
    for warning in &boot.warnings {
        tracing::warn!("{warning}");
    }

    let router = rcc_router::build_router(boot.manager.clone(), boot.global.auth_token.clone());

    let bind = format!("{}:{}", boot.global.host, boot.global.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(bind = %bind, "listening");

    let manager = boot.manager.clone();
    let shutdown_deadline = std::time::Duration::from_secs(boot.global.shutdown_deadline_secs);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    tracing::info!("draining in-flight requests");
    manager.shutdown(shutdown_deadline).await;
    Ok(())
}

/// Resolves once either SIGINT or (on unix) SIGTERM fires, letting
/// `axum::serve` start its graceful-shutdown drain (spec §6).
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            return;
        };
        signal.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
