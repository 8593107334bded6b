//! Request/response logging for every route.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::info;

use crate::responder::RequestOrigin;

use super::handlers::request_origin;
use super::AppState;

/// Header names whose values never reach the logs.
const SENSITIVE_HEADERS: [&str; 5] = ["authorization", "cookie", "set-cookie", "x-api-key", "password"];

/// Header name/value pairs with sensitive values replaced by `[REDACTED]`.
pub fn redacted_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                "[REDACTED]".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name, value)
        })
        .collect()
}

/// Scheme and host a request arrived on, as seen by the client.
///
/// Server-side URIs are origin-form and carry no scheme, so this follows the
/// forwarding headers and the listener's TLS flag.
pub fn logged_origin(headers: &HeaderMap, state: &AppState) -> RequestOrigin {
    request_origin(headers, state.tls, &state.fallback_authority)
}

/// Logs the request line and headers, then the status and latency.
/// Bodies are not buffered.
pub async fn log_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();
    let origin = logged_origin(request.headers(), &state);

    info!(
        %method,
        scheme = %origin.scheme,
        host = %origin.authority,
        %path,
        %query,
        headers = ?redacted_headers(request.headers()),
        "HTTP request"
    );

    let response = next.run(request).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "HTTP response"
    );
    response
}
