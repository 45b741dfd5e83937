//! OAuth2 authorization server endpoints
//!
//! Endpoints:
//! - GET  /.well-known/oauth-authorization-server  RFC 8414 discovery metadata
//! - GET  /.well-known/oauth-protected-resource    protected resource metadata
//! - GET  /authorize, /oauth/authorize             issue a code, 307 to the client
//! - POST /token, /oauth/token                     exchange a code for a token
//!
//! Both path variants are served because clients disagree on which one
//! the discovery document implies.

use std::sync::Arc;

use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mcp_auth::{
    AuthorizationCodeFlow, AuthorizeRequest, CODE_CHALLENGE_METHODS, Error,
    GRANT_TYPE_AUTHORIZATION_CODE, RESPONSE_TYPE_CODE, SUPPORTED_SCOPES, TokenRequest,
    TokenResponse,
};
use tracing::warn;

use crate::error::OAuthError;
use crate::metrics;

/// Shared state for the OAuth endpoints.
#[derive(Clone)]
pub struct OAuthState {
    pub flow: Arc<AuthorizationCodeFlow>,
    /// Configured issuer; derived per request when `None`.
    pub public_url: Option<String>,
}

/// Build the router for discovery, authorization and token endpoints.
pub fn build_oauth_router(state: OAuthState) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(protected_resource_metadata),
        )
        .route("/authorize", get(authorize))
        .route("/oauth/authorize", get(authorize))
        .route("/token", post(token))
        .route("/oauth/token", post(token))
        .with_state(state)
}

/// Externally visible base URL of this server, without a trailing slash.
fn issuer(public_url: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(url) = public_url {
        return url.trim_end_matches('/').to_string();
    }
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{proto}://{host}")
}

async fn authorization_server_metadata(
    State(state): State<OAuthState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let issuer = issuer(state.public_url.as_deref(), &headers);
    Json(serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "response_types_supported": [RESPONSE_TYPE_CODE],
        "grant_types_supported": [GRANT_TYPE_AUTHORIZATION_CODE],
        "code_challenge_methods_supported": CODE_CHALLENGE_METHODS,
        "scopes_supported": SUPPORTED_SCOPES,
    }))
}

async fn protected_resource_metadata(
    State(state): State<OAuthState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let issuer = issuer(state.public_url.as_deref(), &headers);
    Json(serde_json::json!({
        "resource": format!("{issuer}/mcp"),
        "authorization_servers": [issuer],
        "scopes_supported": SUPPORTED_SCOPES,
    }))
}

/// Error for a request axum could not decode. A disabled flow still
/// answers with its configuration error first.
fn malformed(state: &OAuthState, detail: String) -> Error {
    if state.flow.is_enabled() {
        Error::InvalidRequest(detail)
    } else {
        Error::Configuration
    }
}

/// GET /authorize: validate the request and redirect back with a code.
///
/// Failures are answered directly with a JSON error rather than redirected,
/// since the redirect URI itself may be the thing that failed validation.
async fn authorize(
    State(state): State<OAuthState>,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Result<Redirect, OAuthError> {
    let result = match query {
        Ok(Query(request)) => state.flow.begin_authorization(request).await,
        Err(rejection) => Err(malformed(&state, rejection.body_text())),
    };
    match result {
        Ok(target) => {
            metrics::record_code_issued();
            Ok(Redirect::temporary(&target))
        }
        Err(e) => {
            warn!(error = %e, "authorization request rejected");
            metrics::record_oauth_error("authorize", e.oauth_code());
            Err(e.into())
        }
    }
}

/// POST /token: exchange an authorization code for an access token.
async fn token(
    State(state): State<OAuthState>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Response, OAuthError> {
    let result = match form {
        Ok(Form(request)) => state.flow.exchange(request).await,
        Err(rejection) => Err(malformed(&state, rejection.body_text())),
    };
    match result {
        Ok(token) => {
            metrics::record_token_issued();
            Ok((
                StatusCode::OK,
                [
                    (header::CACHE_CONTROL, "no-store"),
                    (header::PRAGMA, "no-cache"),
                ],
                Json(TokenResponse::from(token)),
            )
                .into_response())
        }
        Err(e) => {
            warn!(error = %e, "token request rejected");
            metrics::record_oauth_error("token", e.oauth_code());
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use mcp_auth::{CredentialStore, OAuthClient, compute_challenge, generate_verifier};
    use tower::ServiceExt;

    const CLIENT_ID: &str = "claude-connector";
    const CLIENT_SECRET: &str = "s3cret-value";
    const REDIRECT_URI: &str = "https://claude.ai/api/mcp/auth_callback";

    async fn test_state(dir: &tempfile::TempDir, public_url: Option<&str>) -> OAuthState {
        let store = Arc::new(CredentialStore::load(dir.path().join("tokens.json")).await);
        let client = OAuthClient {
            client_id: CLIENT_ID.into(),
            client_secret: common::Secret::new(CLIENT_SECRET.into()),
        };
        OAuthState {
            flow: Arc::new(AuthorizationCodeFlow::new(Some(client), store)),
            public_url: public_url.map(String::from),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn query_param(location: &str, name: &str) -> Option<String> {
        let query = location.split_once('?')?.1;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    fn form_body(fields: &[(&str, &str)]) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish()
    }

    fn token_request(fields: &[(&str, &str)]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form_body(fields)))
            .unwrap()
    }

    #[test]
    fn issuer_prefers_public_url() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "internal:8080".parse().unwrap());
        assert_eq!(
            issuer(Some("https://mcp.example.com/"), &headers),
            "https://mcp.example.com"
        );
    }

    #[test]
    fn issuer_derived_from_host_and_forwarded_proto() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "mcp.example.com".parse().unwrap());
        assert_eq!(issuer(None, &headers), "http://mcp.example.com");

        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert_eq!(issuer(None, &headers), "https://mcp.example.com");
    }

    #[tokio::test]
    async fn discovery_metadata_lists_endpoints_and_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/.well-known/oauth-authorization-server")
                    .header(header::HOST, "mcp.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["issuer"], "http://mcp.example.com");
        assert_eq!(json["authorization_endpoint"], "http://mcp.example.com/authorize");
        assert_eq!(json["token_endpoint"], "http://mcp.example.com/token");
        assert_eq!(json["response_types_supported"], serde_json::json!(["code"]));
        assert_eq!(
            json["grant_types_supported"],
            serde_json::json!(["authorization_code"])
        );
        assert_eq!(
            json["code_challenge_methods_supported"],
            serde_json::json!(["S256", "plain"])
        );
        assert_eq!(json["scopes_supported"], serde_json::json!(["mcp", "claudeai"]));
    }

    #[tokio::test]
    async fn protected_resource_metadata_points_at_issuer() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, Some("https://mcp.example.com")).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/.well-known/oauth-protected-resource")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["resource"], "https://mcp.example.com/mcp");
        assert_eq!(
            json["authorization_servers"],
            serde_json::json!(["https://mcp.example.com"])
        );
    }

    #[tokio::test]
    async fn authorize_redirects_with_code_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let uri = format!(
            "/oauth/authorize?{}",
            form_body(&[
                ("client_id", CLIENT_ID),
                ("redirect_uri", REDIRECT_URI),
                ("response_type", "code"),
                ("state", "xyz 123"),
            ])
        );
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with(REDIRECT_URI));
        assert!(query_param(location, "code").is_some());
        assert_eq!(query_param(location, "state").as_deref(), Some("xyz 123"));
    }

    #[tokio::test]
    async fn authorize_unknown_client_is_unauthorized_client() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let uri = format!(
            "/authorize?{}",
            form_body(&[
                ("client_id", "intruder"),
                ("redirect_uri", REDIRECT_URI),
                ("response_type", "code"),
            ])
        );
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "unauthorized_client");
    }

    #[tokio::test]
    async fn authorize_wrong_response_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let uri = format!(
            "/authorize?{}",
            form_body(&[
                ("client_id", CLIENT_ID),
                ("redirect_uri", REDIRECT_URI),
                ("response_type", "token"),
            ])
        );
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "unsupported_response_type");
    }

    #[tokio::test]
    async fn full_pkce_flow_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        let uri = format!(
            "/authorize?{}",
            form_body(&[
                ("client_id", CLIENT_ID),
                ("redirect_uri", REDIRECT_URI),
                ("response_type", "code"),
                ("code_challenge", &challenge),
                ("code_challenge_method", "S256"),
            ])
        );
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let code = query_param(location, "code").unwrap();

        let response = app
            .clone()
            .oneshot(token_request(&[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
                ("code_verifier", &verifier),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let json = body_json(response).await;
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["scope"], "mcp");
        assert_eq!(json["client_id"], CLIENT_ID);
        assert!(json["access_token"].as_str().unwrap().len() >= 64);
        let expires_in = json["expires_in"].as_i64().unwrap();
        assert!((86_390..=86_400).contains(&expires_in));

        // Codes are single use.
        let response = app
            .oneshot(token_request(&[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
                ("code_verifier", &verifier),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn token_with_bad_secret_is_invalid_client() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let response = app
            .oneshot(token_request(&[
                ("grant_type", "authorization_code"),
                ("code", "whatever"),
                ("client_id", CLIENT_ID),
                ("client_secret", "wrong"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_client");
        assert!(!json.to_string().contains("wrong"));
    }

    #[tokio::test]
    async fn token_unsupported_grant_type() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let response = app
            .oneshot(token_request(&[("grant_type", "client_credentials")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "unsupported_grant_type");
    }

    async fn disabled_state(dir: &tempfile::TempDir) -> OAuthState {
        let store = Arc::new(CredentialStore::load(dir.path().join("tokens.json")).await);
        OAuthState {
            flow: Arc::new(AuthorizationCodeFlow::new(None, store)),
            public_url: None,
        }
    }

    #[tokio::test]
    async fn disabled_flow_rejects_with_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(disabled_state(&dir).await);

        let response = app
            .oneshot(token_request(&[("grant_type", "authorization_code")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request");
        assert_eq!(json["error_description"], "OAuth2 is not enabled");
    }

    #[tokio::test]
    async fn disabled_flow_answers_undecodable_requests_with_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(disabled_state(&dir).await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .body(Body::from("grant_type=authorization_code"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request");
        assert_eq!(json["error_description"], "OAuth2 is not enabled");
    }

    #[tokio::test]
    async fn token_without_form_content_type_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/oauth/token")
                    .body(Body::from("grant_type=authorization_code"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request");
        assert!(
            json["error_description"]
                .as_str()
                .unwrap()
                .starts_with("malformed request:")
        );
    }

    #[tokio::test]
    async fn token_with_duplicated_field_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let response = app
            .oneshot(token_request(&[
                ("grant_type", "authorization_code"),
                ("grant_type", "client_credentials"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn authorize_with_duplicated_parameter_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_oauth_router(test_state(&dir, None).await);

        let uri = format!(
            "/authorize?{}",
            form_body(&[
                ("client_id", CLIENT_ID),
                ("client_id", "other"),
                ("redirect_uri", REDIRECT_URI),
                ("response_type", "code"),
            ])
        );
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn authorize_with_unusable_redirect_uri_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::load(dir.path().join("tokens.json")).await);
        let client = OAuthClient {
            client_id: CLIENT_ID.into(),
            client_secret: common::Secret::new(CLIENT_SECRET.into()),
        };
        let app = build_oauth_router(OAuthState {
            flow: Arc::new(AuthorizationCodeFlow::new(Some(client), store.clone())),
            public_url: None,
        });

        let uri = format!(
            "/authorize?{}",
            form_body(&[
                ("client_id", CLIENT_ID),
                ("redirect_uri", "https://cb\nx"),
                ("response_type", "code"),
            ])
        );
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request");
        assert_eq!(store.counts().await, (0, 0));
    }
}
