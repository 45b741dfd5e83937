//! Authorization subsystem for the MCP server
//!
//! Implements a single-client OAuth2 authorization server (authorization
//! code grant with PKCE) on top of a file-backed credential store, and the
//! gateway that decides which authentication scheme guards the protected
//! resource. The crate has no HTTP framework dependency; the service binary
//! maps these operations onto routes.
//!
//! Credential flow:
//! 1. Client calls the authorization endpoint → `AuthorizationCodeFlow::begin_authorization`
//! 2. Code is persisted via `CredentialRepository::put_code`
//! 3. Client posts the code to the token endpoint → `AuthorizationCodeFlow::exchange`
//! 4. Token persisted, code deleted (single use)
//! 5. Each protected request → `AuthGateway::authenticate` → `TokenVerifier::verify`

pub mod constants;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod pkce;
pub mod store;
pub mod verifier;

pub use constants::*;
pub use error::{Error, Result};
pub use flow::{AuthorizationCodeFlow, AuthorizeRequest, OAuthClient, TokenRequest, TokenResponse};
pub use gateway::{
    AuthGateway, AuthMode, AuthStrategy, Identity, OAuthStrategy, Rejection,
    SharedSecretStrategy, StaticBearerStrategy,
};
pub use pkce::{ChallengeMethod, compute_challenge, generate_verifier};
pub use store::{AccessToken, AuthorizationCode, CredentialRepository, CredentialStore};
pub use verifier::TokenVerifier;
