//! MCP Server
//!
//! Single-binary Rust service that:
//! 1. Acts as an OAuth2 authorization server for one configured client
//! 2. Guards `/mcp` with exactly one authentication mode
//! 3. Forwards authorized calls to the tool-invocation backend

mod auth;
mod config;
mod error;
mod metrics;
mod oauth;
mod proxy;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Router, middleware};
use mcp_auth::{
    AuthGateway, AuthorizationCodeFlow, CredentialStore, Identity, OAuthClient, OAuthStrategy,
    SharedSecretStrategy, StaticBearerStrategy, TokenVerifier,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::metrics::ServiceMetrics;
use crate::oauth::OAuthState;
use crate::proxy::ProxyState;

const SERVICE_NAME: &str = "mcp-server";

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    gateway: Arc<AuthGateway>,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// `/mcp` sits behind the gateway middleware; the OAuth and discovery
/// endpoints are public. The concurrency limit covers every route.
fn build_router(state: AppState, oauth_state: OAuthState, max_connections: usize) -> Router {
    let protected = Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/mcp/{*rest}", post(mcp_handler))
        .route_layer(middleware::from_fn_with_state(
            state.gateway.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .with_state(state)
        .merge(oauth::build_oauth_router(oauth_state))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting {SERVICE_NAME}");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        upstream_url = %config.upstream.url,
        store_path = %config.auth.store_path.display(),
        "configuration loaded"
    );

    // Never fails: a missing or unreadable snapshot starts empty
    let store = Arc::new(CredentialStore::load(config.auth.store_path.clone()).await);
    let (codes, tokens) = store.counts().await;
    info!(codes, tokens, "credential store opened");

    let auth = config.auth;
    let oauth_client = match (auth.oauth.enabled, auth.oauth.client_id, auth.oauth.client_secret) {
        (true, Some(client_id), Some(client_secret)) => Some(OAuthClient {
            client_id,
            client_secret,
        }),
        _ => None,
    };
    let oauth_enabled = oauth_client.is_some();

    let flow = Arc::new(AuthorizationCodeFlow::new(oauth_client, store.clone()));
    let gateway = Arc::new(AuthGateway::with_default_priority(
        OAuthStrategy::new(TokenVerifier::new(store.clone(), oauth_enabled)),
        StaticBearerStrategy::new(auth.bearer.enabled, auth.bearer.token),
        SharedSecretStrategy::new(auth.shared_secret.token, auth.shared_secret.client_id),
    ));
    info!(auth_mode = gateway.mode().as_str(), "authentication configured");

    let metrics = ServiceMetrics::new();

    let proxy_state = ProxyState {
        client: reqwest::Client::new(),
        upstream_url: config.upstream.url.clone(),
        timeout: Duration::from_secs(config.upstream.timeout_secs),
        requests_total: metrics.requests_total.clone(),
    };

    let app_state = AppState {
        proxy: proxy_state,
        gateway,
        metrics,
        prometheus: prometheus_handle,
    };
    let oauth_state = OAuthState {
        flow,
        public_url: config.server.public_url.clone(),
    };

    let app = build_router(app_state, oauth_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: the server is told to drain, then raced against the timer.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Service info: where the protected resource lives and how it is guarded.
async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "mcp_endpoint": "/mcp",
        "health": "/health",
        "auth_mode": state.gateway.mode(),
    }))
}

/// Health endpoint: status, active auth mode, uptime and requests served.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "healthy",
            "service": SERVICE_NAME,
            "auth_mode": state.gateway.mode(),
            "uptime_seconds": uptime,
            "requests_served": requests,
        })
        .to_string(),
    )
}

/// Prometheus metrics endpoint; text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Protected resource: relay the authorized call upstream.
async fn mcp_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    request: Request,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::forward(&state.proxy, &identity, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
