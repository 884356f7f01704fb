//! HTTP route handlers.
//!
//! `/<script>/<rest>` runs `<script>` with `x-path = <rest>`; every HTTP
//! method is forwarded as `x-method`.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use bytes::Bytes;

use lazycomm_bridge::{METHOD_HEADER, PATH_HEADER, Request};

use crate::executor::{ScriptError, ScriptExecutor};

const GREETING: &str = "hello there! this is a lazycomm server. thank you and have a nice day!";

async fn greeting() -> &'static str {
    GREETING
}

async fn run_script(
    State(executor): State<Arc<ScriptExecutor>>,
    Path(script): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    dispatch(&executor, &script, "", &method, &headers, query, body).await
}

async fn run_nested_script(
    State(executor): State<Arc<ScriptExecutor>>,
    Path((script, rest)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    dispatch(&executor, &script, &rest, &method, &headers, query, body).await
}

async fn dispatch(
    executor: &ScriptExecutor,
    script: &str,
    rest: &str,
    method: &Method,
    headers: &HeaderMap,
    query: Vec<(String, String)>,
    body: Bytes,
) -> Response {
    let request = build_request(rest, method, headers, query, body);
    tracing::debug!(script, path = rest, %method, "Dispatching request");

    match executor.execute(script, request).await {
        Ok(response) => into_http_response(script, response),
        Err(e) => error_response(script, &e),
    }
}

/// Build the LZY request for an HTTP request.
///
/// Header and query names are lower-cased; the first value of a repeated
/// name wins.
fn build_request(
    rest: &str,
    method: &Method,
    headers: &HeaderMap,
    query: Vec<(String, String)>,
    body: Bytes,
) -> Request {
    let mut request = Request::default().with_body(body);

    for (name, value) in headers {
        request
            .headers
            .entry(name.as_str().to_string())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    for (name, value) in query {
        request.query.entry(name.to_lowercase()).or_insert(value);
    }

    request
        .with_header(PATH_HEADER, rest)
        .with_header(METHOD_HEADER, method.as_str())
}

/// Headers owned by the HTTP layer rather than the worker.
fn is_framing_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "content-length" | "transfer-encoding" | "connection" | "keep-alive" | "trailer" | "upgrade"
    )
}

fn into_http_response(script: &str, response: lazycomm_bridge::Response) -> Response {
    let Ok(status) = StatusCode::from_u16(response.status) else {
        tracing::error!(script, status = response.status, "Invalid status code from script");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("invalid status code sent by script ({})", response.status),
        )
            .into_response();
    };

    let mut out = (status, Body::from(response.body)).into_response();
    for (name, value) in &response.headers {
        let (Ok(header_name), Ok(header_value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) else {
            tracing::warn!(script, header = %name, "Dropping invalid response header");
            continue;
        };
        if is_framing_header(&header_name) {
            continue;
        }
        out.headers_mut().insert(header_name, header_value);
    }
    out
}

fn error_response(script: &str, err: &ScriptError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(script, error = %err, "Script execution failed");
    } else {
        tracing::debug!(script, error = %err, "Script unavailable");
    }
    (status, err.to_string()).into_response()
}

pub fn routes(executor: Arc<ScriptExecutor>) -> Router {
    // Bodies go to the worker whole; the extractor default (2 MiB) is too small.
    let body_limit = DefaultBodyLimit::max(executor.max_request_bytes());
    Router::new()
        .route("/", get(greeting))
        .route("/{script}", any(run_script))
        .route("/{script}/", any(run_script))
        .route("/{script}/{*rest}", any(run_nested_script))
        .layer(body_limit)
        .with_state(executor)
}
