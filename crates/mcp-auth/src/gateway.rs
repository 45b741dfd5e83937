//! Authentication gateway for the protected resource
//!
//! Exactly one authentication mode is active per deployment. Strategies are
//! held in priority order (OAuth, static bearer, shared secret) and the
//! first enabled one is selected once at construction. The others are
//! never consulted, even when they are configured. With no enabled
//! strategy every request is authorized.

use async_trait::async_trait;
use common::{Secret, redact};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::verifier::TokenVerifier;

/// Which authentication scheme guards the protected resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[serde(rename = "oauth")]
    OAuth,
    StaticBearer,
    SharedSecret,
    None,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::OAuth => "oauth",
            AuthMode::StaticBearer => "static_bearer",
            AuthMode::SharedSecret => "shared_secret",
            AuthMode::None => "none",
        }
    }
}

/// Caller identity established by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    OAuth { client_id: String, scope: String },
    StaticBearer,
    SharedSecret { client_id: Option<String> },
    /// No authentication is configured.
    Anonymous,
}

impl Identity {
    /// Client identifier, when the scheme carries one.
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Identity::OAuth { client_id, .. } => Some(client_id),
            Identity::SharedSecret { client_id } => client_id.as_deref(),
            Identity::StaticBearer | Identity::Anonymous => None,
        }
    }
}

/// Why the gateway refused a request. Always a 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Missing authorization header")]
    MissingCredential,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Invalid or expired OAuth token")]
    InvalidOrExpiredToken,
}

impl Rejection {
    /// RFC 6750 error code for the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            Rejection::MissingCredential => "invalid_request",
            Rejection::InvalidToken | Rejection::InvalidOrExpiredToken => "invalid_token",
        }
    }
}

/// One authentication scheme in the gateway's priority chain.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn mode(&self) -> AuthMode;

    fn is_enabled(&self) -> bool;

    /// Check the credential presented in the request's bearer header.
    async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, Rejection>;
}

/// OAuth access tokens issued by the authorization code flow.
pub struct OAuthStrategy {
    verifier: TokenVerifier,
}

impl OAuthStrategy {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl AuthStrategy for OAuthStrategy {
    fn mode(&self) -> AuthMode {
        AuthMode::OAuth
    }

    fn is_enabled(&self) -> bool {
        self.verifier.is_enabled()
    }

    async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, Rejection> {
        let token = credential.ok_or(Rejection::MissingCredential)?;
        match self.verifier.verify(token).await {
            Some(record) => {
                debug!(client_id = %record.client_id, "OAuth token verified");
                Ok(Identity::OAuth {
                    client_id: record.client_id,
                    scope: record.scope,
                })
            }
            None => {
                warn!(token = %redact(token), "invalid or expired OAuth token");
                Err(Rejection::InvalidOrExpiredToken)
            }
        }
    }
}

/// A single static bearer token.
pub struct StaticBearerStrategy {
    enabled: bool,
    token: Option<Secret<String>>,
}

impl StaticBearerStrategy {
    pub fn new(enabled: bool, token: Option<Secret<String>>) -> Self {
        Self { enabled, token }
    }
}

#[async_trait]
impl AuthStrategy for StaticBearerStrategy {
    fn mode(&self) -> AuthMode {
        AuthMode::StaticBearer
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, Rejection> {
        let presented = credential.ok_or(Rejection::MissingCredential)?;
        match &self.token {
            Some(expected) if expected.matches(presented) => Ok(Identity::StaticBearer),
            _ => {
                warn!(token = %redact(presented), "static bearer token mismatch");
                Err(Rejection::InvalidToken)
            }
        }
    }
}

/// A shared secret, active whenever one is configured.
pub struct SharedSecretStrategy {
    secret: Option<Secret<String>>,
    client_id: Option<String>,
}

impl SharedSecretStrategy {
    /// `client_id` labels the caller in logs and forwarded requests.
    pub fn new(secret: Option<Secret<String>>, client_id: Option<String>) -> Self {
        Self { secret, client_id }
    }
}

#[async_trait]
impl AuthStrategy for SharedSecretStrategy {
    fn mode(&self) -> AuthMode {
        AuthMode::SharedSecret
    }

    fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, Rejection> {
        let presented = credential.ok_or(Rejection::MissingCredential)?;
        match &self.secret {
            Some(expected) if expected.matches(presented) => {
                debug!(client_id = ?self.client_id, "shared secret verified");
                Ok(Identity::SharedSecret {
                    client_id: self.client_id.clone(),
                })
            }
            _ => {
                warn!(
                    token = %redact(presented),
                    presented_len = presented.len(),
                    "shared secret mismatch"
                );
                Err(Rejection::InvalidToken)
            }
        }
    }
}

/// Single entry point for authenticating protected-resource requests.
pub struct AuthGateway {
    active: Option<Box<dyn AuthStrategy>>,
}

impl AuthGateway {
    /// Select the first enabled strategy from a priority-ordered list.
    pub fn new(strategies: Vec<Box<dyn AuthStrategy>>) -> Self {
        let active = strategies.into_iter().find(|s| s.is_enabled());
        let mode = active.as_ref().map_or(AuthMode::None, |s| s.mode());
        if mode == AuthMode::None {
            warn!("no authentication configured, protected resource is open");
        } else {
            info!(mode = mode.as_str(), "authentication mode selected");
        }
        Self { active }
    }

    /// The standard chain: OAuth, then static bearer, then shared secret.
    pub fn with_default_priority(
        oauth: OAuthStrategy,
        bearer: StaticBearerStrategy,
        shared_secret: SharedSecretStrategy,
    ) -> Self {
        Self::new(vec![
            Box::new(oauth),
            Box::new(bearer),
            Box::new(shared_secret),
        ])
    }

    pub fn mode(&self) -> AuthMode {
        self.active.as_ref().map_or(AuthMode::None, |s| s.mode())
    }

    /// Authenticate one inbound request by its bearer credential, if any.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, Rejection> {
        match &self.active {
            Some(strategy) => strategy.authenticate(credential).await,
            None => Ok(Identity::Anonymous),
        }
    }
}
