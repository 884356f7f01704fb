//! lazycomm: an HTTP gateway that runs one worker script per request and
//! talks to it over LZY frames on stdin/stdout.

pub mod config;
pub mod executor;
pub mod logging;
pub mod transport;

pub use config::{Config, load_config, parse_config};
pub use executor::{ScriptError, ScriptExecutor};
pub use transport::{ServerConfig, serve, serve_with_shutdown};

pub const LAZYCOMM_VERSION: &str = env!("CARGO_PKG_VERSION");
