//! Gateway tracing setup.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use lazycomm_bridge::logging::{env_filter, json_requested};

/// Log everything to stdout and append a plain-text copy to
/// `<logs_dir>/server.log`.
pub fn init_gateway_tracing(logs_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs dir: {}", logs_dir.display()))?;
    let log_path = logs_dir.join("server.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let file_layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
    let registry = tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer);

    if json_requested() {
        registry
            .with(fmt::layer().json().with_writer(std::io::stdout))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stdout))
            .try_init()?;
    }
    Ok(())
}
