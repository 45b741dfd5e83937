//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (OAuth client secret, static bearer token, shared secret) are
//! loaded from env vars or from files named in the config, never stored in
//! the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const OAUTH_CLIENT_SECRET_ENV: &str = "OAUTH_CLIENT_SECRET";
const BEARER_TOKEN_ENV: &str = "BEARER_TOKEN";
const SHARED_SECRET_ENV: &str = "MCP_TOKEN";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Externally visible base URL used as the OAuth issuer. Derived from
    /// the request's Host header when unset.
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Tool-invocation backend that authorized requests are forwarded to
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Authentication settings. At most one scheme is active at runtime.
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub bearer: BearerConfig,
    #[serde(default)]
    pub shared_secret: SharedSecretConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            oauth: OAuthConfig::default(),
            bearer: BearerConfig::default(),
            shared_secret: SharedSecretConfig::default(),
        }
    }
}

/// OAuth2 authorization server for the single configured client
#[derive(Debug, Default, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to OAUTH_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

/// Static bearer token
#[derive(Debug, Default, Deserialize)]
pub struct BearerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file containing the token (alternative to BEARER_TOKEN)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// Shared secret, active whenever one is configured
#[derive(Debug, Default, Deserialize)]
pub struct SharedSecretConfig {
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file containing the secret (alternative to MCP_TOKEN)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Label for callers using the shared secret
    #[serde(default)]
    pub client_id: Option<String>,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("oauth_tokens.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay secrets from the
    /// environment or secret files.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !is_http_url(&config.upstream.url) {
            return Err(common::Error::Config(format!(
                "upstream.url must start with http:// or https://, got: {}",
                config.upstream.url
            )));
        }

        if let Some(public_url) = &config.server.public_url
            && !is_http_url(public_url)
        {
            return Err(common::Error::Config(format!(
                "server.public_url must start with http:// or https://, got: {public_url}"
            )));
        }

        if config.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "upstream.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        let auth = &mut config.auth;
        auth.oauth.client_secret =
            resolve_secret(OAUTH_CLIENT_SECRET_ENV, auth.oauth.client_secret_file.as_deref())?;
        auth.bearer.token = resolve_secret(BEARER_TOKEN_ENV, auth.bearer.token_file.as_deref())?;
        auth.shared_secret.token =
            resolve_secret(SHARED_SECRET_ENV, auth.shared_secret.token_file.as_deref())?;

        if auth.oauth.enabled {
            if auth.oauth.client_id.as_deref().is_none_or(str::is_empty) {
                return Err(common::Error::Config(
                    "auth.oauth.client_id is required when OAuth is enabled".into(),
                ));
            }
            if auth.oauth.client_secret.is_none() {
                return Err(common::Error::Config(format!(
                    "OAuth is enabled but no client secret is set ({OAUTH_CLIENT_SECRET_ENV} or auth.oauth.client_secret_file)"
                )));
            }
        }

        if auth.bearer.enabled && auth.bearer.token.is_none() {
            return Err(common::Error::Config(format!(
                "bearer auth is enabled but no token is set ({BEARER_TOKEN_ENV} or auth.bearer.token_file)"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("mcp-server.toml")
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Env var takes precedence over file. Both sources are trimmed, and
/// blank values count as unset.
fn resolve_secret(env_var: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        let value = value.trim();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value.to_owned())));
        }
    }

    let Some(file) = file else {
        return Ok(None);
    };

    let value = std::fs::read_to_string(file).map_err(|e| {
        common::Error::Config(format!("failed to read secret file {}: {e}", file.display()))
    })?;
    let value = value.trim().to_owned();
    Ok((!value.is_empty()).then(|| Secret::new(value)))
}
