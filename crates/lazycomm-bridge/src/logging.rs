//! Tracing setup shared by the gateway and worker binaries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the log filter from `RUST_LOG`, falling back to `LAZYCOMM_LOG`.
///
/// `LAZYCOMM_LOG` takes a bare level (`debug`, `info`, `warn`, `error`) and
/// applies it to the lazycomm crates only.
pub fn env_filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let level = match std::env::var("LAZYCOMM_LOG").as_deref() {
        Ok("trace") => "trace",
        Ok("debug") => "debug",
        Ok("warn") | Ok("warning") => "warn",
        Ok("error") => "error",
        _ => "info",
    };

    EnvFilter::new(format!(
        "warn,lazycomm={level},lazycomm_bridge={level},lzy_echo={level}"
    ))
}

/// True when `LOG_FORMAT=json`.
pub fn json_requested() -> bool {
    std::env::var("LOG_FORMAT").as_deref() == Ok("json")
}

/// Initialize tracing for a worker process.
///
/// Logs go to stderr: stdout carries the response frame.
pub fn init_worker_tracing() {
    let registry = tracing_subscriber::registry().with(env_filter());
    if json_requested() {
        let _ = registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = registry
            .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
            .try_init();
    }
}
