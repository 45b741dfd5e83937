//! Durable storage for authorization codes and access tokens
//!
//! Both collections live in one JSON snapshot that is rewritten in full
//! after every mutation, using temp file + rename so a crash mid-write
//! leaves the previous snapshot intact. A tokio Mutex serializes mutations
//! so two concurrent writers never interleave their snapshots.
//!
//! The store trades durability for availability: a missing or unreadable
//! snapshot starts the store empty, and a failed write is logged while the
//! in-memory state stays authoritative for the running process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// A single-use authorization grant.
///
/// Timestamps are absolute instants serialized as RFC 3339 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
}

impl AuthorizationCode {
    /// A code is still usable at exactly `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A bearer credential issued by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    #[serde(rename = "access_token")]
    pub token: String,
    pub token_type: String,
    pub scope: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// A token is still valid at exactly `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Lifetime in seconds as advertised to the client.
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - self.created_at).num_seconds()
    }
}

/// Repository interface used by the code flow and the token verifier.
///
/// Mutations are durable when they return; persistence failures are the
/// implementation's concern and never surface to callers.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn put_code(&self, code: AuthorizationCode);
    async fn get_code(&self, code: &str) -> Option<AuthorizationCode>;
    /// Remove a code, returning it if it was present.
    async fn delete_code(&self, code: &str) -> Option<AuthorizationCode>;

    async fn put_token(&self, token: AccessToken);
    async fn get_token(&self, token: &str) -> Option<AccessToken>;
    /// Remove a token, returning it if it was present.
    async fn delete_token(&self, token: &str) -> Option<AccessToken>;
}

/// On-disk layout: two maps keyed by the credential string.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    codes: BTreeMap<String, AuthorizationCode>,
    #[serde(default)]
    tokens: BTreeMap<String, AccessToken>,
}

/// File-backed credential store.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<Snapshot>,
}

impl CredentialStore {
    /// Open the store at `path`. Never fails.
    ///
    /// A missing file starts an empty store and writes an empty snapshot so
    /// later loads take the normal path. An unreadable or corrupt file is
    /// logged and replaced by an empty store on the next mutation.
    pub async fn load(path: PathBuf) -> Self {
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<Snapshot>(&contents) {
                Ok(snapshot) => {
                    info!(
                        path = %path.display(),
                        codes = snapshot.codes.len(),
                        tokens = snapshot.tokens.len(),
                        "loaded credential store"
                    );
                    snapshot
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "credential store is corrupt, starting empty");
                    Snapshot::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "credential store not found, starting empty");
                let snapshot = Snapshot::default();
                if let Err(e) = write_atomic(&path, &snapshot).await {
                    warn!(path = %path.display(), error = %e, "could not create credential store");
                }
                snapshot
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "credential store unreadable, starting empty");
                Snapshot::default()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Location of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored `(codes, tokens)`, expired entries included.
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.codes.len(), state.tokens.len())
    }

    /// Write the snapshot while the caller still holds the lock.
    async fn persist(&self, state: &Snapshot) {
        if let Err(e) = write_atomic(&self.path, state).await {
            error!(path = %self.path.display(), error = %e, "failed to persist credential store");
        }
    }
}

#[async_trait]
impl CredentialRepository for CredentialStore {
    async fn put_code(&self, code: AuthorizationCode) {
        let mut state = self.state.lock().await;
        debug!(client_id = %code.client_id, "storing authorization code");
        state.codes.insert(code.code.clone(), code);
        self.persist(&state).await;
    }

    async fn get_code(&self, code: &str) -> Option<AuthorizationCode> {
        let state = self.state.lock().await;
        state.codes.get(code).cloned()
    }

    async fn delete_code(&self, code: &str) -> Option<AuthorizationCode> {
        let mut state = self.state.lock().await;
        let removed = state.codes.remove(code);
        if removed.is_some() {
            debug!("removed authorization code");
            self.persist(&state).await;
        }
        removed
    }

    async fn put_token(&self, token: AccessToken) {
        let mut state = self.state.lock().await;
        debug!(client_id = %token.client_id, "storing access token");
        state.tokens.insert(token.token.clone(), token);
        self.persist(&state).await;
    }

    async fn get_token(&self, token: &str) -> Option<AccessToken> {
        let state = self.state.lock().await;
        state.tokens.get(token).cloned()
    }

    async fn delete_token(&self, token: &str) -> Option<AccessToken> {
        let mut state = self.state.lock().await;
        let removed = state.tokens.remove(token);
        if removed.is_some() {
            debug!("removed access token");
            self.persist(&state).await;
        }
        removed
    }
}

/// Write the snapshot atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. The file holds live bearer tokens, so it is created 0600 on
/// unix.
async fn write_atomic(path: &Path, data: &Snapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::StoreFormat(format!("serializing credential store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential store path has no parent directory".into()))?;
    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Io(format!("creating credential store directory: {e}")))?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("credentials");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential store: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential store permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential store: {e}")))?;

    debug!(path = %path.display(), "persisted credential store");
    Ok(())
}
