use std::time::Instant;

use axum::{
    body::Body,
    http::{Request, header::AGE},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};

/// Log every response; failures at warn/error, everything else at debug.
///
/// `cached` reports whether the response was replayed from the output cache.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();
    let cached = response.headers().contains_key(AGE);

    if status.is_server_error() {
        error!(
            target = "outcache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms = elapsed_ms,
            "request failed",
        );
    } else if status.is_client_error() {
        warn!(
            target = "outcache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            query = uri.query().unwrap_or(""),
            elapsed_ms = elapsed_ms,
            "client request error",
        );
    } else {
        debug!(
            target = "outcache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = elapsed_ms,
            cached,
            "request served",
        );
    }

    response
}
