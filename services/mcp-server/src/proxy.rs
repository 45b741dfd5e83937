//! Protected-resource forwarding
//!
//! Authorized `/mcp` requests are relayed to the tool-invocation backend.
//! The inbound credential never leaves this service: the `Authorization`
//! header is stripped along with hop-by-hop headers, and the authenticated
//! client id travels in `x-mcp-client-id` instead. The upstream response is
//! returned verbatim, including its error statuses.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use mcp_auth::Identity;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

use crate::metrics;

/// Header carrying the authenticated client identity upstream.
pub const CLIENT_ID_HEADER: &str = "x-mcp-client-id";

/// Maximum inbound body size accepted for forwarding.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Timeouts get 2 retries with a fixed backoff; nothing else is retried.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Headers never forwarded: hop-by-hop per RFC 2616 Section 13.5.1, plus
/// the caller's credential, host, and any client-supplied identity header.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "authorization",
    "host",
    CLIENT_ID_HEADER,
];

/// Shared state for the forwarding handler
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub timeout: Duration,
    pub requests_total: Arc<AtomicU64>,
}

/// JSON error body: {"error":{"type":"upstream_error","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "upstream_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Forward an authorized request to the upstream tool service.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn forward(
    state: &ProxyState,
    identity: &Identity,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let response = forward_inner(state, identity, request, &request_id).await;

    metrics::record_upstream(response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

async fn forward_inner(
    state: &ProxyState,
    identity: &Identity,
    request: axum::http::Request<axum::body::Body>,
    request_id: &str,
) -> Response {
    let method = request.method().clone();
    let upstream_url = match request.uri().path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if !is_stripped(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    if let Some(client_id) = identity.client_id() {
        match HeaderValue::from_str(client_id) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(CLIENT_ID_HEADER), value);
            }
            Err(e) => warn!(error = %e, "client id is not a valid header value, not forwarding it"),
        }
    }

    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    };

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            warn!(attempt, "retrying after upstream timeout");
            tokio::time::sleep(RETRY_DELAY).await;
        }

        let req = state
            .client
            .request(method.clone(), &upstream_url)
            .headers(headers.clone())
            .timeout(state.timeout)
            .body(body_bytes.clone());

        match req.send().await {
            Ok(upstream_response) => return relay(upstream_response, request_id).await,
            Err(e) if e.is_timeout() && attempt + 1 < MAX_ATTEMPTS => continue,
            Err(e) if e.is_timeout() => {
                error!(error = %e, attempts = MAX_ATTEMPTS, "upstream timeout after all retries");
                return error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    &format!(
                        "upstream timeout after {}s ({MAX_ATTEMPTS} attempts)",
                        state.timeout.as_secs()
                    ),
                    request_id,
                );
            }
            Err(e) => {
                error!(error = %e, "upstream request failed");
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("upstream error: {e}"),
                    request_id,
                );
            }
        }
    }

    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "unexpected retry exhaustion",
        request_id,
    )
}

/// Copy an upstream response back to the caller, minus hop-by-hop headers.
async fn relay(upstream_response: reqwest::Response, request_id: &str) -> Response {
    let status = upstream_response.status();
    let resp_headers = upstream_response.headers().clone();

    let resp_body = match upstream_response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read upstream response body");
            return error_response(
                StatusCode::BAD_GATEWAY,
                &format!("upstream response read error: {e}"),
                request_id,
            );
        }
    };

    let mut response = Response::builder().status(status);
    for (name, value) in &resp_headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(resp_body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Headers dropped from the inbound request before forwarding.
pub fn is_stripped(name: &str) -> bool {
    STRIPPED_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Hop-by-hop headers only; used on the response path.
fn is_hop_by_hop(name: &str) -> bool {
    STRIPPED_HEADERS[..8]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
