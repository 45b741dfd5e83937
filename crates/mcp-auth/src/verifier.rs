//! Access token verification
//!
//! Tokens are valid while present in the store and not past `expires_at`.
//! An expired token is evicted on the first verification that notices it;
//! there is no background sweep.

use std::sync::Arc;

use chrono::Utc;
use common::redact;
use tracing::{debug, info};

use crate::store::{AccessToken, CredentialRepository};

pub struct TokenVerifier {
    store: Arc<dyn CredentialRepository>,
    enabled: bool,
}

impl TokenVerifier {
    pub fn new(store: Arc<dyn CredentialRepository>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a presented token. Returns the stored record when it is
    /// known and unexpired.
    pub async fn verify(&self, token: &str) -> Option<AccessToken> {
        if !self.enabled {
            return None;
        }

        let Some(record) = self.store.get_token(token).await else {
            debug!(token = %redact(token), "token not found");
            return None;
        };

        if record.is_expired_at(Utc::now()) {
            info!(
                token = %redact(token),
                expired_at = %record.expires_at,
                "token expired, removing from store"
            );
            self.store.delete_token(token).await;
            return None;
        }

        debug!(client_id = %record.client_id, expires_at = %record.expires_at, "token valid");
        Some(record)
    }
}
