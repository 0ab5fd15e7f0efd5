use std::path::PathBuf;

use clap::Parser;

/// Process-level flags (spec §6). `config` is the provider/virtual-model
/// JSON file the assembler consumes; everything else feeds
/// `rcc_common::GlobalConfig` by way of `rcc_core::bootstrap::Cli`. `dsn`
/// and `data_dir` are resolved here, before handing off to `rcc-core`,
/// since the friendly data-dir-relative sqlite default isn't something the
/// core crate should need to know about.
#[derive(Parser, Debug)]
#[command(name = "rcc", about = "Route Claude Code: a routing gateway over heterogeneous LLM providers")]
pub(crate) struct Cli {
    #[arg(long, env = "RCC_CONFIG")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "", env = "RCC_DSN")]
    pub(crate) dsn: String,
    #[arg(long, default_value = "", env = "RCC_DATA_DIR")]
    pub(crate) data_dir: String,
    #[arg(long, default_value = "0.0.0.0", env = "RCC_HOST")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 8787, env = "RCC_PORT")]
    pub(crate) port: u16,
    #[arg(long, env = "RCC_AUTH_TOKEN")]
    pub(crate) auth_token: Option<String>,
    #[arg(long, env = "RCC_PROXY")]
    pub(crate) proxy: Option<String>,
    #[arg(long, env = "RCC_MAX_IN_FLIGHT")]
    pub(crate) default_max_in_flight: Option<usize>,
    #[arg(long, env = "RCC_SHUTDOWN_DEADLINE_SECS")]
    pub(crate) shutdown_deadline_secs: Option<u64>,
}
