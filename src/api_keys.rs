/* keyward/src/api_keys.rs

API key lifecycle: generation, validation, rotation, revocation and listing.

Key design:
- Plaintext keys: "<prefix><secret>" where secret is URL-safe base64 of
  `secret_bytes` random bytes (default prefix "kw_", 32 bytes).
- The plaintext is returned exactly once. The store keeps only the SHA-256 hex
  digest, which is also the lookup index for validation.
- Identities are manager-generated ids ("key_<32 hex>"). Each identity holds up
  to `max_versions` versions; exactly one is active until the key is revoked.
- Expiry is lazy: checked at validation time and by the background sweeper,
  which removes versions that are both expired and inactive.

Hash at rest vs raw CSRF tokens:
- API keys are long-lived, so only their hash is stored.
- CSRF tokens (see crate::csrf) are short-lived and compared per request, so
  they are stored raw and compared in constant time. The asymmetry is
  intentional; do not "fix" one to match the other.
*/

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ApiKeyConfig;
use crate::error::{CredentialError, Result};
use crate::secret::{constant_time_eq, generate_prefixed, hash_secret};
use crate::store::{expiry_after, CredentialRecord, CredentialStore};
use crate::sweeper::Sweeper;

/// Characters of the random part kept in the display hint.
const HINT_RANDOM_CHARS: usize = 4;

// ==============================
// Public model
// ==============================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    /// Rotated away.
    Inactive,
    Revoked,
    Expired,
}

/// Read-only projection of one key version. Never carries secret material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    pub id: String,
    pub name: String,
    pub version: u32,
    /// Prefix plus the first few characters of the plaintext, for display.
    pub hint: String,
    pub status: KeyStatus,
    pub scopes: BTreeSet<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKeyInfo {
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    /// See [`require_scopes`].
    pub fn has_scopes(&self, required: &[&str]) -> bool {
        require_scopes(self, required)
    }
}

/// A freshly generated or rotated key. `token` is the only copy of the
/// plaintext.
#[derive(Clone, Serialize, Deserialize)]
pub struct GeneratedKey {
    pub token: String,
    pub key: ApiKeyInfo,
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("token", &"<redacted>")
            .field("key", &self.key)
            .finish()
    }
}

// Internal record held in the store.
#[derive(Debug, Clone)]
struct ApiKeyRecord {
    id: String,
    name: String,
    version: u32,
    key_hash: String,
    hint: String,
    active: bool,
    scopes: BTreeSet<String>,
    created_by: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
}

impl CredentialRecord for ApiKeyRecord {
    fn identity(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn lookup_key(&self) -> Option<&str> {
        Some(&self.key_hash)
    }
}

impl ApiKeyRecord {
    fn status(&self, now: DateTime<Utc>) -> KeyStatus {
        if self.revoked_at.is_some() {
            KeyStatus::Revoked
        } else if !self.active {
            KeyStatus::Inactive
        } else if self.is_expired(now) {
            KeyStatus::Expired
        } else {
            KeyStatus::Active
        }
    }

    fn to_info(&self, now: DateTime<Utc>) -> ApiKeyInfo {
        ApiKeyInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version,
            hint: self.hint.clone(),
            status: self.status(now),
            scopes: self.scopes.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            rotated_at: self.rotated_at,
            last_used_at: self.last_used_at,
            revoked_at: self.revoked_at,
        }
    }
}

// ==============================
// Manager
// ==============================

pub struct ApiKeyManager {
    config: ApiKeyConfig,
    store: Arc<CredentialStore<ApiKeyRecord>>,
    sweeper: Sweeper,
}

impl ApiKeyManager {
    /// Build a manager and start its background sweeper on the current tokio
    /// runtime.
    ///
    /// Outside a runtime (or with a zero `sweep_interval`) no sweeper starts;
    /// the manager still enforces expiry on validation and
    /// [`sweep_expired`](Self::sweep_expired) can be driven by the caller.
    pub fn new(config: ApiKeyConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(CredentialStore::new());
        let sweeper = Sweeper::spawn("api_keys", store.clone(), config.sweep_interval);
        Ok(Self {
            config,
            store,
            sweeper,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ApiKeyConfig::from_env())
    }

    pub fn config(&self) -> &ApiKeyConfig {
        &self.config
    }

    fn new_secret(&self) -> Result<(String, String, String)> {
        let token = generate_prefixed(&self.config.key_prefix, self.config.secret_bytes)?;
        let hash = hash_secret(&token);
        let hint_len = self.config.key_prefix.len() + HINT_RANDOM_CHARS;
        let hint = token.chars().take(hint_len).collect();
        Ok((token, hash, hint))
    }

    // --------------------------
    // Key lifecycle
    // --------------------------

    /// Create version 1 of a new key. The plaintext in the returned
    /// [`GeneratedKey`] is never stored.
    pub fn generate_key<I, S>(&self, name: &str, scopes: I, created_by: &str) -> Result<GeneratedKey>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(CredentialError::InvalidInput("key name must not be empty".into()));
        }
        let scopes = normalize_scopes(scopes)?;

        let (token, key_hash, hint) = self.new_secret()?;
        let now = Utc::now();
        let rec = ApiKeyRecord {
            id: uuid_key_id(),
            name: name.to_string(),
            version: 1,
            key_hash,
            hint,
            active: true,
            scopes,
            created_by: created_by.trim().to_string(),
            created_at: now,
            expires_at: expiry_after(now, self.config.ttl),
            rotated_at: None,
            last_used_at: None,
            revoked_at: None,
        };
        let key = rec.to_info(now);
        self.store.put(rec);

        info!(key_id = %key.id, name = %key.name, created_by = %key.created_by, "API key generated");
        Ok(GeneratedKey { token, key })
    }

    /// Check a presented plaintext key.
    ///
    /// Fails with `Invalid` when no stored hash matches, `Inactive` when the
    /// matching version was rotated away or revoked, `Expired` when past its
    /// TTL. On success `last_used_at` is updated.
    pub fn validate_key(&self, presented: &str) -> Result<ApiKeyInfo> {
        let presented = presented.trim();
        if presented.is_empty() {
            return Err(CredentialError::Invalid);
        }
        let hash = hash_secret(presented);
        let rec = self
            .store
            .find_by_lookup_key(&hash)
            .ok_or(CredentialError::Invalid)?;
        if !constant_time_eq(rec.key_hash.as_bytes(), hash.as_bytes()) {
            return Err(CredentialError::Invalid);
        }

        let now = Utc::now();
        if !rec.active {
            return Err(CredentialError::Inactive(rec.id));
        }
        if rec.is_expired(now) {
            return Err(CredentialError::Expired(rec.id));
        }

        // A rotation may land between the check above and this write; the
        // caller then sees the version it was validated against.
        let touched = self
            .store
            .update(&rec.id, |versions| {
                versions
                    .iter_mut()
                    .find(|r| r.version == rec.version && r.active)
                    .map(|r| {
                        r.last_used_at = Some(now);
                        r.to_info(now)
                    })
            })
            .flatten();

        Ok(touched.unwrap_or_else(|| {
            let mut info = rec.to_info(now);
            info.last_used_at = Some(now);
            info
        }))
    }

    /// Replace the active version of `identity` with a fresh secret.
    ///
    /// The previous version is deactivated atomically with inserting
    /// `version + 1`; name, scopes and attribution carry over, the TTL
    /// restarts. Versions beyond `max_versions` are pruned oldest first.
    /// A revoked identity cannot be rotated.
    pub fn rotate_key(&self, identity: &str) -> Result<GeneratedKey> {
        // Entropy is drawn before taking the table lock.
        let (token, key_hash, hint) = self.new_secret()?;
        let now = Utc::now();
        let ttl = self.config.ttl;
        let max_versions = self.config.max_versions;

        let (rec, pruned) = self
            .store
            .update(identity, |versions| {
                let current = versions
                    .iter()
                    .rev()
                    .find(|r| r.active)
                    .cloned()
                    .ok_or_else(|| CredentialError::Inactive(identity.to_string()))?;
                let next_version = versions.iter().map(|r| r.version).max().unwrap_or(0) + 1;

                for r in versions.iter_mut() {
                    r.active = false;
                }
                let rec = ApiKeyRecord {
                    version: next_version,
                    key_hash,
                    hint,
                    active: true,
                    rotated_at: Some(now),
                    expires_at: expiry_after(now, ttl),
                    last_used_at: None,
                    revoked_at: None,
                    ..current
                };
                versions.push(rec.clone());
                let pruned = prune_versions(versions, max_versions);
                Ok((rec, pruned))
            })
            .ok_or_else(|| CredentialError::NotFound(identity.to_string()))??;

        info!(key_id = %rec.id, version = rec.version, pruned, "API key rotated");
        Ok(GeneratedKey {
            token,
            key: rec.to_info(now),
        })
    }

    /// Deactivate every version of `identity`. No version validates afterwards,
    /// whatever its expiry. Revoking twice is a no-op.
    pub fn revoke_key(&self, identity: &str) -> Result<()> {
        let now = Utc::now();
        let newly = self
            .store
            .update(identity, |versions| {
                let mut newly = false;
                for r in versions.iter_mut() {
                    r.active = false;
                    if r.revoked_at.is_none() {
                        r.revoked_at = Some(now);
                        newly = true;
                    }
                }
                newly
            })
            .ok_or_else(|| CredentialError::NotFound(identity.to_string()))?;

        if newly {
            info!(key_id = %identity, "API key revoked");
        } else {
            debug!(key_id = %identity, "API key already revoked");
        }
        Ok(())
    }

    /// Latest version of one key.
    pub fn get_key_info(&self, identity: &str) -> Result<ApiKeyInfo> {
        self.store
            .latest(identity)
            .map(|r| r.to_info(Utc::now()))
            .ok_or_else(|| CredentialError::NotFound(identity.to_string()))
    }

    /// Every retained version of one key, oldest first.
    pub fn key_versions(&self, identity: &str) -> Result<Vec<ApiKeyInfo>> {
        let now = Utc::now();
        let versions = self.store.all_versions(identity);
        if versions.is_empty() {
            return Err(CredentialError::NotFound(identity.to_string()));
        }
        Ok(versions.iter().map(|r| r.to_info(now)).collect())
    }

    /// Latest version of every key, oldest key first.
    pub fn list_keys(&self) -> Vec<ApiKeyInfo> {
        let now = Utc::now();
        let mut keys: Vec<ApiKeyInfo> = self
            .store
            .latest_per_identity()
            .iter()
            .map(|r| r.to_info(now))
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        keys
    }

    /// Drop versions that are expired and inactive. The background sweeper
    /// calls the same store operation on its interval.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.store.sweep_expired(Utc::now());
        debug!(removed, "API key sweep");
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

// ==============================
// - Helpers: scopes, ids, pruning
// ==============================

/// Every required scope must be present on the key. Scopes are an explicit
/// allow-list: an empty scope set grants nothing beyond an empty requirement,
/// and no scope implies another.
pub fn require_scopes(key: &ApiKeyInfo, required: &[&str]) -> bool {
    required.iter().all(|s| key.scopes.contains(*s))
}

/// [`require_scopes`] as a `Result`, naming the missing scopes.
pub fn authorize(key: &ApiKeyInfo, required: &[&str]) -> Result<()> {
    check_scopes(&key.scopes, required)
}

/// `Forbidden` listing whichever of `required` is absent from `granted`.
pub fn check_scopes(granted: &BTreeSet<String>, required: &[&str]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|s| !granted.contains(**s))
        .map(|s| s.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CredentialError::Forbidden(missing))
    }
}

fn normalize_scopes<I, S>(scopes: I) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out = BTreeSet::new();
    for scope in scopes {
        let scope: String = scope.into();
        let scope = scope.trim();
        if scope.is_empty() || scope.chars().any(char::is_whitespace) {
            return Err(CredentialError::InvalidInput(format!(
                "invalid scope {scope:?}"
            )));
        }
        out.insert(scope.to_string());
    }
    Ok(out)
}

fn uuid_key_id() -> String {
    format!("key_{:032x}", Uuid::new_v4().as_u128())
}

/// Remove the oldest inactive versions until at most `max` remain. The active
/// version is never removed. Returns how many were pruned.
fn prune_versions(versions: &mut Vec<ApiKeyRecord>, max: usize) -> usize {
    versions.sort_by_key(|r| r.version);
    let mut pruned = 0;
    while versions.len() > max {
        match versions.iter().position(|r| !r.active) {
            Some(pos) => {
                versions.remove(pos);
                pruned += 1;
            }
            None => break,
        }
    }
    pruned
}

// ==============================
// Tests
// ==============================
