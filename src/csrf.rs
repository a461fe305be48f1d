//! CSRF token lifecycle.
//!
//! One token per session, stored raw so it can be compared in constant time.
//! Issuing or rotating overwrites the session's previous token; there is no
//! history. Tokens are short-lived and the table is process-local, which is
//! why they are not hashed at rest like API keys.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CsrfConfig;
use crate::error::{CredentialError, Result};
use crate::secret::{constant_time_eq, generate_secret};
use crate::store::{expiry_after, CredentialRecord, CredentialStore};
use crate::sweeper::Sweeper;

#[derive(Clone)]
struct CsrfRecord {
    session_id: String,
    token: String,
    /// Bumped on every re-issue for the same session.
    version: u32,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CsrfRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfRecord")
            .field("session_id", &self.session_id)
            .field("token", &"<redacted>")
            .field("version", &self.version)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CredentialRecord for CsrfRecord {
    fn identity(&self) -> &str {
        &self.session_id
    }

    fn version(&self) -> u32 {
        self.version
    }

    // Tokens are never deactivated in place; revocation deletes them.
    fn is_active(&self) -> bool {
        true
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn is_sweepable(&self, now: DateTime<Utc>) -> bool {
        self.is_expired(now)
    }
}

/// Token metadata without the token itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrfTokenInfo {
    pub session_id: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl From<&CsrfRecord> for CsrfTokenInfo {
    fn from(rec: &CsrfRecord) -> Self {
        Self {
            session_id: rec.session_id.clone(),
            version: rec.version,
            created_at: rec.created_at,
            expires_at: rec.expires_at,
            rotated_at: rec.rotated_at,
        }
    }
}

pub struct CsrfManager {
    config: CsrfConfig,
    store: Arc<CredentialStore<CsrfRecord>>,
    sweeper: Sweeper,
}

impl CsrfManager {
    /// Build a manager and start its background sweeper on the current tokio
    /// runtime.
    ///
    /// Outside a runtime (or with a zero `sweep_interval`) the manager is
    /// fully usable but nothing sweeps in the background: expired tokens
    /// still fail validation and stay in memory until
    /// [`sweep_expired`](Self::sweep_expired) is called. Check
    /// [`sweeper_running`](Self::sweeper_running) when that matters.
    pub fn new(config: CsrfConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(CredentialStore::new());
        let sweeper = Sweeper::spawn("csrf", store.clone(), config.sweep_interval);
        Ok(Self {
            config,
            store,
            sweeper,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(CsrfConfig::from_env())
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    fn fresh_record(&self, session_id: &str) -> Result<CsrfRecord> {
        let token = generate_secret(self.config.secret_bytes)?;
        let now = Utc::now();
        Ok(CsrfRecord {
            session_id: session_id.to_string(),
            token,
            version: 1,
            created_at: now,
            expires_at: expiry_after(now, self.config.ttl),
            rotated_at: None,
        })
    }

    /// Install `rec` as the session's only token, continuing its version count.
    fn install(versions: &mut Vec<CsrfRecord>, mut rec: CsrfRecord) -> String {
        if let Some(prev) = versions.last() {
            rec.version = prev.version + 1;
            rec.rotated_at = Some(rec.created_at);
        }
        let token = rec.token.clone();
        versions.clear();
        versions.push(rec);
        token
    }

    /// Issue a new token for `session_id`, replacing any existing one.
    pub fn issue_token(&self, session_id: &str) -> Result<String> {
        let session_id = check_session_id(session_id)?;
        let rec = self.fresh_record(session_id)?;
        let token = self
            .store
            .upsert(session_id, |versions| Self::install(versions, rec));
        debug!(session_id = %session_id, "CSRF token issued");
        Ok(token)
    }

    /// Re-issue the session's token. Called after a state-changing request so
    /// each token is spent once.
    pub fn rotate_token(&self, session_id: &str) -> Result<String> {
        let token = self.issue_token(session_id)?;
        debug!(session_id = %session_id, "CSRF token rotated");
        Ok(token)
    }

    /// The session's current token if it is still live, otherwise a new one.
    pub fn ensure_token(&self, session_id: &str) -> Result<String> {
        let session_id = check_session_id(session_id)?;
        let rec = self.fresh_record(session_id)?;
        let now = Utc::now();
        Ok(self.store.upsert(session_id, |versions| {
            match versions.last() {
                Some(current) if !current.is_expired(now) => current.token.clone(),
                _ => Self::install(versions, rec),
            }
        }))
    }

    /// Check `presented` against the session's token, naming the failure:
    /// `NotFound` for no token, `Expired` past TTL, `Invalid` on mismatch.
    pub fn check_token(&self, session_id: &str, presented: &str) -> Result<()> {
        let session_id = check_session_id(session_id)?;
        let rec = self
            .store
            .get(session_id)
            .ok_or_else(|| CredentialError::NotFound(session_id.to_string()))?;
        verify(&rec, presented, Utc::now())
    }

    /// Boolean form of [`check_token`](Self::check_token).
    pub fn validate_token(&self, session_id: &str, presented: &str) -> bool {
        self.check_token(session_id, presented).is_ok()
    }

    /// Validate and rotate under one write lock, returning the replacement
    /// token. Of several concurrent requests presenting the same token, at
    /// most one succeeds.
    pub fn consume_token(&self, session_id: &str, presented: &str) -> Result<String> {
        let session_id = check_session_id(session_id)?;
        let rec = self.fresh_record(session_id)?;
        let now = Utc::now();
        let token = self
            .store
            .update(session_id, |versions| {
                let current = versions
                    .last()
                    .ok_or_else(|| CredentialError::NotFound(session_id.to_string()))?;
                verify(current, presented, now)?;
                Ok(Self::install(versions, rec))
            })
            .ok_or_else(|| CredentialError::NotFound(session_id.to_string()))??;
        debug!(session_id = %session_id, "CSRF token consumed and rotated");
        Ok(token)
    }

    /// Delete the session's token outright, e.g. on logout. Returns whether a
    /// token existed.
    pub fn revoke_token(&self, session_id: &str) -> bool {
        let Ok(session_id) = check_session_id(session_id) else {
            return false;
        };
        let removed = self.store.delete(session_id) > 0;
        if removed {
            info!(session_id = %session_id, "CSRF token revoked");
        }
        removed
    }

    pub fn token_info(&self, session_id: &str) -> Result<CsrfTokenInfo> {
        let session_id = check_session_id(session_id)?;
        self.store
            .latest(session_id)
            .map(|r| CsrfTokenInfo::from(&r))
            .ok_or_else(|| CredentialError::NotFound(session_id.to_string()))
    }

    /// Sessions currently holding a token, expired-but-unswept included.
    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    pub fn sweep_expired(&self) -> usize {
        let removed = self.store.sweep_expired(Utc::now());
        debug!(removed, "CSRF sweep");
        removed
    }

    /// Signal the background sweeper to stop without waiting.
    pub fn stop(&self) -> bool {
        self.sweeper.stop()
    }

    /// Stop the background sweeper and wait for it to exit.
    pub async fn shutdown(&self) {
        self.sweeper.shutdown().await;
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.is_running()
    }
}

fn check_session_id(session_id: &str) -> Result<&str> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        return Err(CredentialError::InvalidInput(
            "session id must not be empty".into(),
        ));
    }
    Ok(trimmed)
}

fn verify(rec: &CsrfRecord, presented: &str, now: DateTime<Utc>) -> Result<()> {
    if rec.is_expired(now) {
        return Err(CredentialError::Expired(rec.session_id.clone()));
    }
    if !constant_time_eq(rec.token.as_bytes(), presented.as_bytes()) {
        return Err(CredentialError::Invalid);
    }
    Ok(())
}
