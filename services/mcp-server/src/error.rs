//! HTTP renderings of authorization failures
//!
//! OAuth endpoint errors use the RFC 6749 body shape
//! `{"error": "<code>", "error_description": "<message>"}`. Gateway
//! rejections use the same shape with a 401 and a `WWW-Authenticate`
//! challenge. Neither ever echoes a presented or configured secret.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// OAuth endpoint failure.
#[derive(Debug)]
pub struct OAuthError(pub mcp_auth::Error);

impl From<mcp_auth::Error> for OAuthError {
    fn from(err: mcp_auth::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
        let body = serde_json::json!({
            "error": self.0.oauth_code(),
            "error_description": self.0.to_string(),
        });
        (
            status,
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            body.to_string(),
        )
            .into_response()
    }
}

/// Gateway refusal for a protected-resource request.
#[derive(Debug)]
pub struct AuthRejection(pub mcp_auth::Rejection);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.0.error_code(),
            "error_description": self.0.to_string(),
        });
        let mut response = (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}
