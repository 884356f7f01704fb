//! Transport layer for lazycomm.
//!
//! HTTP via axum is the only client-facing transport. LZY frames never leave
//! the worker pipes.

pub mod http;

pub use http::{ServerConfig, serve, serve_with_shutdown};
