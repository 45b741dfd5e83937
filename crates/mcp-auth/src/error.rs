//! Error types for the authorization subsystem
//!
//! Every variant is terminal for the request that produced it. The HTTP
//! layer maps them onto RFC 6749 error codes via [`Error::oauth_code`] and
//! [`Error::status_code`].

/// Errors from the authorization code flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("OAuth2 is not enabled")]
    Configuration,

    #[error("{0} is required")]
    MissingParameter(&'static str),

    #[error("malformed request: {0}")]
    InvalidRequest(String),

    #[error("redirect_uri is not a valid absolute URI: {0}")]
    InvalidRedirectUri(String),

    #[error("response_type must be 'code', got '{0}'")]
    UnsupportedResponseType(String),

    #[error("grant_type must be 'authorization_code', got '{0}'")]
    UnsupportedGrantType(String),

    #[error("invalid client_id")]
    UnauthorizedClient,

    #[error("invalid client credentials")]
    InvalidClient,

    #[error("invalid or expired authorization code")]
    InvalidGrant,

    #[error("redirect_uri mismatch")]
    RedirectMismatch,

    #[error("client_id mismatch")]
    ClientMismatch,

    #[error("unsupported code_challenge_method: {0}")]
    UnsupportedChallengeMethod(String),

    #[error("invalid code_verifier (PKCE verification failed)")]
    PkceVerificationFailed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential store format error: {0}")]
    StoreFormat(String),
}

impl Error {
    /// RFC 6749 error code for the `error` field of an OAuth error response.
    pub fn oauth_code(&self) -> &'static str {
        match self {
            Error::Configuration
            | Error::MissingParameter(_)
            | Error::InvalidRequest(_)
            | Error::InvalidRedirectUri(_)
            | Error::UnsupportedChallengeMethod(_) => "invalid_request",
            Error::UnsupportedResponseType(_) => "unsupported_response_type",
            Error::UnsupportedGrantType(_) => "unsupported_grant_type",
            Error::UnauthorizedClient => "unauthorized_client",
            Error::InvalidClient => "invalid_client",
            Error::InvalidGrant
            | Error::RedirectMismatch
            | Error::ClientMismatch
            | Error::PkceVerificationFailed => "invalid_grant",
            Error::Io(_) | Error::StoreFormat(_) => "server_error",
        }
    }

    /// HTTP status class for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::UnauthorizedClient | Error::InvalidClient => 401,
            Error::Io(_) | Error::StoreFormat(_) => 500,
            _ => 400,
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
