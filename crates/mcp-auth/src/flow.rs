//! OAuth2 authorization code flow with PKCE
//!
//! Two operations against the single configured client:
//! 1. `begin_authorization` mints a one-time code bound to the client,
//!    redirect URI, scope and optional PKCE challenge, and returns the
//!    redirect target carrying it.
//! 2. `exchange` trades a valid code for an access token.
//!
//! Validation runs in a fixed order and the first failing check wins.
//! Stateless checks come first, then store lookups, then the PKCE
//! comparison. Exchanges are serialized so two requests racing on the
//! same code see exactly one success.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{TimeDelta, Utc};
use common::Secret;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::{Url, form_urlencoded};

use crate::constants::{
    CODE_BYTES, CODE_TTL_SECS, DEFAULT_SCOPE, GRANT_TYPE_AUTHORIZATION_CODE, RESPONSE_TYPE_CODE,
    TOKEN_BYTES, TOKEN_TTL_SECS, TOKEN_TYPE,
};
use crate::error::{Error, Result};
use crate::pkce;
use crate::store::{AccessToken, AuthorizationCode, CredentialRepository};

/// The single client allowed to use the flow.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl OAuthClient {
    /// Both the id and the secret must match exactly.
    fn authenticates(&self, client_id: &str, client_secret: &str) -> bool {
        let id_ok = self.client_id == client_id;
        let secret_ok = self.client_secret.matches(client_secret);
        id_ok && secret_ok
    }
}

/// Query parameters of the authorization endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Form fields of the token endpoint.
#[derive(Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("redirect_uri", &self.redirect_uri)
            .field("client_id", &self.client_id)
            .field("code", &self.code.as_ref().map(|_| "[REDACTED]"))
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("code_verifier", &self.code_verifier.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// JSON body returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
    pub client_id: String,
    pub created_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
}

impl From<AccessToken> for TokenResponse {
    fn from(token: AccessToken) -> Self {
        Self {
            expires_in: token.expires_in(),
            access_token: token.token,
            token_type: token.token_type,
            scope: token.scope,
            client_id: token.client_id,
            created_at: token.created_at,
            expires_at: token.expires_at,
        }
    }
}

/// Issues authorization codes and exchanges them for access tokens.
pub struct AuthorizationCodeFlow {
    client: Option<OAuthClient>,
    store: Arc<dyn CredentialRepository>,
    exchange_lock: Mutex<()>,
}

impl AuthorizationCodeFlow {
    /// `client` is `None` when OAuth is disabled for the deployment.
    pub fn new(client: Option<OAuthClient>, store: Arc<dyn CredentialRepository>) -> Self {
        Self {
            client,
            store,
            exchange_lock: Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Validate an authorization request, mint a code and return the
    /// redirect target `{redirect_uri}?code={code}[&state={state}]`.
    pub async fn begin_authorization(&self, request: AuthorizeRequest) -> Result<String> {
        let client = self.client.as_ref().ok_or(Error::Configuration)?;

        let client_id = required(&request.client_id, "client_id")?;
        let redirect_uri = required(&request.redirect_uri, "redirect_uri")?;
        let response_type = required(&request.response_type, "response_type")?;
        if response_type != RESPONSE_TYPE_CODE {
            return Err(Error::UnsupportedResponseType(response_type.to_string()));
        }
        validate_redirect_uri(redirect_uri)?;

        if client_id != client.client_id {
            warn!(client_id, "authorization requested by unknown client");
            return Err(Error::UnauthorizedClient);
        }

        let scope = non_empty(&request.scope).unwrap_or(DEFAULT_SCOPE);
        let (code_challenge, code_challenge_method) = match non_empty(&request.code_challenge) {
            Some(challenge) => {
                let method = non_empty(&request.code_challenge_method).unwrap_or(pkce::DEFAULT_METHOD);
                (Some(challenge.to_string()), Some(method.to_string()))
            }
            None => (None, None),
        };

        let now = Utc::now();
        let code = AuthorizationCode {
            code: random_string::<CODE_BYTES>(),
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scope: scope.to_string(),
            created_at: now,
            expires_at: now + TimeDelta::seconds(CODE_TTL_SECS),
            code_challenge,
            code_challenge_method,
        };

        let redirect = build_redirect(redirect_uri, &code.code, request.state.as_deref());

        info!(
            client_id,
            scope,
            pkce = code.code_challenge_method.as_deref().unwrap_or("none"),
            "authorization code issued"
        );
        self.store.put_code(code).await;

        Ok(redirect)
    }

    /// Exchange an authorization code for an access token.
    ///
    /// The code is removed on success and when it is found expired; every
    /// other failure leaves the store untouched.
    pub async fn exchange(&self, request: TokenRequest) -> Result<AccessToken> {
        let client = self.client.as_ref().ok_or(Error::Configuration)?;

        let grant_type = required(&request.grant_type, "grant_type")?;
        if grant_type != GRANT_TYPE_AUTHORIZATION_CODE {
            return Err(Error::UnsupportedGrantType(grant_type.to_string()));
        }

        let code_value = required(&request.code, "code")?;
        let client_id = required(&request.client_id, "client_id")?;
        let client_secret = required(&request.client_secret, "client_secret")?;

        if !client.authenticates(client_id, client_secret) {
            warn!(client_id, "token request with invalid client credentials");
            return Err(Error::InvalidClient);
        }

        let _guard = self.exchange_lock.lock().await;

        let code = self
            .store
            .get_code(code_value)
            .await
            .ok_or(Error::InvalidGrant)?;

        if code.is_expired_at(Utc::now()) {
            self.store.delete_code(code_value).await;
            info!(client_id, expired_at = %code.expires_at, "authorization code expired");
            return Err(Error::InvalidGrant);
        }

        if let Some(redirect_uri) = non_empty(&request.redirect_uri)
            && redirect_uri != code.redirect_uri
        {
            return Err(Error::RedirectMismatch);
        }

        if client_id != code.client_id {
            return Err(Error::ClientMismatch);
        }

        if let Some(challenge) = &code.code_challenge {
            let verifier = required(&request.code_verifier, "code_verifier")?;
            let method = code
                .code_challenge_method
                .as_deref()
                .unwrap_or(pkce::DEFAULT_METHOD);
            pkce::verify(challenge, method, verifier)?;
        }

        let now = Utc::now();
        let token = AccessToken {
            token: random_string::<TOKEN_BYTES>(),
            token_type: TOKEN_TYPE.to_string(),
            scope: code.scope.clone(),
            client_id: client_id.to_string(),
            created_at: now,
            expires_at: now + TimeDelta::seconds(TOKEN_TTL_SECS),
        };
        self.store.put_token(token.clone()).await;
        self.store.delete_code(code_value).await;

        info!(
            client_id,
            scope = %token.scope,
            pkce = code.code_challenge.is_some(),
            token = %common::redact(&token.token),
            "access token issued"
        );

        Ok(token)
    }
}

/// A present, non-empty parameter or `MissingParameter`.
fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str> {
    non_empty(value).ok_or(Error::MissingParameter(name))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// `N` random bytes as URL-safe base64 without padding.
fn random_string<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Append `code` and optional `state` to the redirect URI.
///
/// The code is base64url and needs no escaping; `state` is form-encoded so
/// the client reads back exactly what it sent.
/// The redirect target ends up verbatim in a `Location` header, so it must
/// parse as an absolute URI and consist of visible ASCII only. The URL
/// parser silently drops tabs and newlines, hence the explicit byte check.
fn validate_redirect_uri(redirect_uri: &str) -> Result<()> {
    if let Some(c) = redirect_uri.chars().find(|c| !c.is_ascii_graphic()) {
        return Err(Error::InvalidRedirectUri(format!(
            "contains disallowed character {c:?}"
        )));
    }
    Url::parse(redirect_uri)
        .map(|_| ())
        .map_err(|e| Error::InvalidRedirectUri(e.to_string()))
}

fn build_redirect(redirect_uri: &str, code: &str, state: Option<&str>) -> String {
    let separator = if redirect_uri.contains('?') { '&' } else { '?' };
    let mut url = format!("{redirect_uri}{separator}code={code}");
    if let Some(state) = state.filter(|s| !s.is_empty()) {
        url.push_str("&state=");
        url.extend(form_urlencoded::byte_serialize(state.as_bytes()));
    }
    url
}
