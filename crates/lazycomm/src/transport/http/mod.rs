//! HTTP gateway: one worker process per request.

pub mod routes;
pub mod server;

pub use routes::routes;
pub use server::{ServerConfig, serve, serve_with_shutdown};
