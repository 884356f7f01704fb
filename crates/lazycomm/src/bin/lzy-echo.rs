//! Demo worker: replies 200 with the request headers and query merged into
//! the response headers, and the request body echoed back.
//!
//! Point the gateway's `interpreter` at this binary to serve every script
//! name with it.

use std::process::ExitCode;

use lazycomm_bridge::logging::init_worker_tracing;
use lazycomm_bridge::run_worker;

fn main() -> ExitCode {
    init_worker_tracing();

    run_worker(|request, responder| {
        tracing::info!(path = %request.path, method = %request.method, "Echoing request");
        // Printed output is redirected to stderr, never into the frame.
        println!("echoing {} {}", request.method, request.path);

        let mut headers = request.headers;
        headers.extend(request.query);
        responder.respond(200, headers, request.body)?;
        Ok(())
    })
}
