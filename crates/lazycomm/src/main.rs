use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use lazycomm::{LAZYCOMM_VERSION, ScriptExecutor, ServerConfig};

#[derive(Parser)]
#[command(name = "lazycomm", version, about = "lazycomm script gateway")]
struct Cli {
    /// Path to configuration file. A missing file means defaults.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Bind address. Overrides config.
    #[arg(long)]
    host: Option<String>,

    /// Listen port. Overrides config.
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of worker scripts. Overrides config.
    #[arg(short, long)]
    scripts_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = lazycomm::load_config(&cli.config)?;
    if let Some(host) = cli.host {
        cfg.host = host;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(scripts_dir) = cli.scripts_dir {
        cfg.scripts_dir = scripts_dir;
    }
    cfg.validate()?;

    lazycomm::logging::init_gateway_tracing(&cfg.logs_dir)?;
    info!(
        version = LAZYCOMM_VERSION,
        scripts_dir = %cfg.scripts_dir.display(),
        timeout_ms = cfg.timeout_ms,
        "lazycomm starting"
    );

    let executor = Arc::new(ScriptExecutor::new(&cfg));
    lazycomm::serve(ServerConfig::from(&cfg), executor).await
}
