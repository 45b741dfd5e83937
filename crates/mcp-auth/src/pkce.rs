//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The authorization endpoint stores the client's challenge and method
//! verbatim. At exchange time the presented verifier is transformed with
//! the bound method and compared against that challenge.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::constant_time_eq;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Challenge method used when a challenge arrives without one.
pub const DEFAULT_METHOD: &str = "plain";

/// Supported code challenge transformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMethod {
    Plain,
    S256,
}

impl ChallengeMethod {
    /// Parse a stored method name. Names are case-sensitive per RFC 7636.
    pub fn parse(method: &str) -> Result<Self> {
        match method {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(Error::UnsupportedChallengeMethod(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }

    /// Transform a verifier into the value the client should have sent
    /// as its challenge.
    pub fn transform(&self, verifier: &str) -> String {
        match self {
            Self::Plain => verifier.to_string(),
            Self::S256 => compute_challenge(verifier),
        }
    }
}

/// Check a verifier against a stored challenge and method name.
///
/// Fails with [`Error::UnsupportedChallengeMethod`] for unknown methods and
/// [`Error::PkceVerificationFailed`] when the transformed verifier differs.
pub fn verify(challenge: &str, method: &str, verifier: &str) -> Result<()> {
    let method = ChallengeMethod::parse(method)?;
    let transformed = method.transform(verifier);
    if constant_time_eq(&transformed, challenge) {
        Ok(())
    } else {
        Err(Error::PkceVerificationFailed)
    }
}

/// Generate a cryptographically random PKCE code verifier.
///
/// 64 random bytes encoded as URL-safe base64 without padding gives 86
/// characters, inside the 43-128 range RFC 7636 allows.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
