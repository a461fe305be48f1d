//! Construction-time configuration for the managers and their HTTP carriers.
//!
//! Environment variables (all optional):
//! - KEYWARD_KEY_SECRET_BYTES        = <usize>   (default 32)
//! - KEYWARD_KEY_PREFIX              = <string>  (default "kw_")
//! - KEYWARD_KEY_TTL_SECONDS         = <u64>     (default 90 days)
//! - KEYWARD_KEY_SWEEP_SECONDS       = <u64>     (default 300)
//! - KEYWARD_KEY_MAX_VERSIONS        = <usize>   (default 3)
//! - KEYWARD_KEY_HEADER              = <header>  (default "X-API-Key")
//! - KEYWARD_KEY_QUERY_PARAM         = <name>|"" (default "api_key", empty disables)
//! - KEYWARD_CSRF_SECRET_BYTES       = <usize>   (default 32)
//! - KEYWARD_CSRF_TTL_SECONDS        = <u64>     (default 3600)
//! - KEYWARD_CSRF_SWEEP_SECONDS      = <u64>     (default 300)
//! - KEYWARD_CSRF_HEADER             = <header>  (default "X-CSRF-Token")
//! - KEYWARD_CSRF_FORM_FIELD         = <name>    (default "csrf_token")
//! - KEYWARD_CSRF_SESSION_COOKIE     = <name>    (default "session_id")
//! - KEYWARD_CSRF_EXEMPT_PATHS       = comma list (default "/status,/health,/metrics")
//! - KEYWARD_CSRF_COOKIE_NAME        = <name>    (default "csrf_token")
//! - KEYWARD_CSRF_COOKIE_SECURE      = 1|true|yes|on (default true)
//! - KEYWARD_CSRF_COOKIE_HTTP_ONLY   = 1|true|yes|on (default true)
//! - KEYWARD_CSRF_COOKIE_SAME_SITE   = strict|lax|none (default strict)

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, Result};
use crate::util::{env_list, env_parse, env_string, env_truthy};

const DAY: u64 = 24 * 60 * 60;

/// Policy for API keys.
#[derive(Debug, Clone)]
pub struct ApiKeyConfig {
    /// Random bytes per secret before encoding.
    pub secret_bytes: usize,
    /// Human-readable prefix on every plaintext key.
    pub key_prefix: String,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    /// Versions retained per identity, active one included.
    pub max_versions: usize,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            secret_bytes: 32,
            key_prefix: "kw_".to_string(),
            ttl: Duration::from_secs(90 * DAY),
            sweep_interval: Duration::from_secs(300),
            max_versions: 3,
        }
    }
}

impl ApiKeyConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            secret_bytes: env_parse("KEYWARD_KEY_SECRET_BYTES").unwrap_or(d.secret_bytes),
            key_prefix: env_string("KEYWARD_KEY_PREFIX").unwrap_or(d.key_prefix),
            ttl: env_parse("KEYWARD_KEY_TTL_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(d.ttl),
            sweep_interval: env_parse("KEYWARD_KEY_SWEEP_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),
            max_versions: env_parse("KEYWARD_KEY_MAX_VERSIONS").unwrap_or(d.max_versions),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret_bytes == 0 {
            return Err(CredentialError::Config("secret_bytes must be > 0".into()));
        }
        if self.ttl.is_zero() {
            return Err(CredentialError::Config("ttl must be > 0".into()));
        }
        if self.max_versions == 0 {
            return Err(CredentialError::Config("max_versions must be >= 1".into()));
        }
        Ok(())
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    #[default]
    Strict,
    Lax,
    None,
}

impl SameSitePolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(SameSitePolicy::Strict),
            "lax" => Some(SameSitePolicy::Lax),
            "none" => Some(SameSitePolicy::None),
            _ => None,
        }
    }
}

/// Attributes of the cookie carrying the CSRF token. Max-age mirrors the TTL.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSitePolicy,
    pub path: String,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: "csrf_token".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSitePolicy::Strict,
            path: "/".to_string(),
        }
    }
}

/// Policy and carriers for CSRF tokens.
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    pub secret_bytes: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub cookie: CookieSettings,
    /// Header an unsafe request presents its token in.
    pub header_name: String,
    /// Form field for handlers that accept form posts.
    pub form_field: String,
    /// Cookie holding the caller's session identifier.
    pub session_cookie: String,
    /// Path prefixes that bypass the check entirely.
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret_bytes: 32,
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(300),
            cookie: CookieSettings::default(),
            header_name: "X-CSRF-Token".to_string(),
            form_field: "csrf_token".to_string(),
            session_cookie: "session_id".to_string(),
            exempt_paths: vec![
                "/status".to_string(),
                "/health".to_string(),
                "/metrics".to_string(),
            ],
        }
    }
}

impl CsrfConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let cookie = CookieSettings {
            name: env_string("KEYWARD_CSRF_COOKIE_NAME").unwrap_or(d.cookie.name),
            secure: env_truthy("KEYWARD_CSRF_COOKIE_SECURE", d.cookie.secure),
            http_only: env_truthy("KEYWARD_CSRF_COOKIE_HTTP_ONLY", d.cookie.http_only),
            same_site: env_string("KEYWARD_CSRF_COOKIE_SAME_SITE")
                .and_then(|s| SameSitePolicy::parse(&s))
                .unwrap_or(d.cookie.same_site),
            path: d.cookie.path,
        };
        Self {
            secret_bytes: env_parse("KEYWARD_CSRF_SECRET_BYTES").unwrap_or(d.secret_bytes),
            ttl: env_parse("KEYWARD_CSRF_TTL_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(d.ttl),
            sweep_interval: env_parse("KEYWARD_CSRF_SWEEP_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(d.sweep_interval),
            cookie,
            header_name: env_string("KEYWARD_CSRF_HEADER").unwrap_or(d.header_name),
            form_field: env_string("KEYWARD_CSRF_FORM_FIELD").unwrap_or(d.form_field),
            session_cookie: env_string("KEYWARD_CSRF_SESSION_COOKIE")
                .unwrap_or(d.session_cookie),
            exempt_paths: env_list("KEYWARD_CSRF_EXEMPT_PATHS").unwrap_or(d.exempt_paths),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret_bytes == 0 {
            return Err(CredentialError::Config("secret_bytes must be > 0".into()));
        }
        if self.ttl.is_zero() {
            return Err(CredentialError::Config("ttl must be > 0".into()));
        }
        if self.header_name.trim().is_empty() || self.cookie.name.trim().is_empty() {
            return Err(CredentialError::Config(
                "header and cookie names must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// True when `path` is on the exemption list (prefix match on segment
    /// boundaries, so `/health` exempts `/health/live` but not `/healthz`).
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| {
            path == p
                || path
                    .strip_prefix(p.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Where the HTTP adapter looks for a presented API key.
#[derive(Debug, Clone)]
pub struct ApiKeyTransport {
    pub header_name: String,
    /// Query-parameter fallback; `None` disables it.
    pub query_param: Option<String>,
}

impl Default for ApiKeyTransport {
    fn default() -> Self {
        Self {
            header_name: "X-API-Key".to_string(),
            query_param: Some("api_key".to_string()),
        }
    }
}

impl ApiKeyTransport {
    pub fn from_env() -> Self {
        let d = Self::default();
        let query_param = match std::env::var("KEYWARD_KEY_QUERY_PARAM") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v.trim().to_string()),
            Err(_) => d.query_param,
        };
        Self {
            header_name: env_string("KEYWARD_KEY_HEADER").unwrap_or(d.header_name),
            query_param,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ApiKeyConfig::default().validate().is_ok());
        assert!(CsrfConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_values_rejected() {
        let cfg = ApiKeyConfig {
            max_versions: 0,
            ..ApiKeyConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CredentialError::Config(_))));

        let cfg = CsrfConfig {
            ttl: Duration::ZERO,
            ..CsrfConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CredentialError::Config(_))));
    }

    #[test]
    fn exempt_paths_match_on_segments() {
        let cfg = CsrfConfig::default();
        assert!(cfg.is_exempt("/health"));
        assert!(cfg.is_exempt("/health/live"));
        assert!(!cfg.is_exempt("/healthz"));
        assert!(!cfg.is_exempt("/keys"));
    }

    #[test]
    fn same_site_parsing() {
        assert_eq!(SameSitePolicy::parse("LAX"), Some(SameSitePolicy::Lax));
        assert_eq!(SameSitePolicy::parse(" none "), Some(SameSitePolicy::None));
        assert_eq!(SameSitePolicy::parse("sometimes"), None);
    }
}
