//! Gateway middleware for the protected resource
//!
//! Runs before every `/mcp` handler. The bearer credential (if any) goes to
//! the `AuthGateway`; on success the resulting `Identity` is stored in the
//! request extensions for the handler, on failure the request never reaches
//! it.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use mcp_auth::AuthGateway;
use tracing::debug;

use crate::error::AuthRejection;
use crate::metrics;

/// Extract the credential from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively. A header with any other scheme
/// is treated as no credential at all.
pub fn bearer_credential(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// axum middleware: authenticate, then hand the identity to the next layer.
pub async fn require_auth(
    State(gateway): State<Arc<AuthGateway>>,
    mut request: Request,
    next: Next,
) -> Response {
    let mode = gateway.mode().as_str();
    let result = gateway
        .authenticate(bearer_credential(request.headers()))
        .await;

    match result {
        Ok(identity) => {
            metrics::record_auth(mode, "allowed");
            debug!(mode, client_id = identity.client_id(), "request authenticated");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(rejection) => {
            metrics::record_auth(mode, rejection.error_code());
            AuthRejection(rejection).into_response()
        }
    }
}
