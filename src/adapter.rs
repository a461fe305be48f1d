//! actix-web integration: error rendering, credential extraction, and the two
//! middlewares that guard routes with API keys and CSRF tokens.
//!
//! Managers and transport settings are read from app data
//! (`web::Data<ApiKeyManager>`, `web::Data<CsrfManager>`,
//! `web::Data<ApiKeyTransport>`); a missing manager is a server
//! misconfiguration and renders as 500.

use std::collections::{BTreeSet, HashMap};
use std::future::{ready, Ready};

use actix_web::body::{BoxBody, MessageBody};
use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use actix_web::http::Method;
use actix_web::middleware::Next;
use actix_web::{web, Error, FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;
use tracing::{debug, warn};

use crate::api_keys::{check_scopes, ApiKeyInfo, ApiKeyManager};
use crate::config::{ApiKeyTransport, CsrfConfig, SameSitePolicy};
use crate::csrf::CsrfManager;
use crate::error::{CredentialError, Result};
use crate::util::error_response;

impl ResponseError for CredentialError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(self.http_status().as_u16())
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        error_response(self.http_status(), &self.public_message())
    }
}

// ==============================
// API keys
// ==============================

/// Token from an `Authorization: Bearer <token>` value. The scheme is
/// case-insensitive; anything else yields `None`.
pub fn bearer_token(auth_header: Option<&str>) -> Option<&str> {
    let s = auth_header?.trim();
    if s.len() < 7 {
        return None;
    }
    let (scheme, rest) = (s.get(..6)?, s.get(6..)?);
    if !scheme.eq_ignore_ascii_case("bearer") || !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let t = rest.trim();
    (!t.is_empty()).then_some(t)
}

/// Validate the key carried in an `Authorization` header value.
pub fn verify_bearer(manager: &ApiKeyManager, auth_header: Option<&str>) -> Result<ApiKeyInfo> {
    let token = bearer_token(auth_header).ok_or(CredentialError::Invalid)?;
    manager.validate_key(token)
}

/// The presented API key: the configured header first, then a bearer token,
/// then the query parameter when enabled.
pub fn extract_api_key(req: &HttpRequest, transport: &ApiKeyTransport) -> Option<String> {
    let header = req
        .headers()
        .get(transport.header_name.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(v) = header {
        return Some(v.to_string());
    }

    let auth = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if let Some(t) = bearer_token(auth) {
        return Some(t.to_string());
    }

    let param = transport.query_param.as_deref()?;
    web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().remove(param))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The authenticated key, placed in request extensions by
/// [`api_key_middleware`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiKeyClaims {
    pub key_id: String,
    pub name: String,
    pub version: u32,
    pub scopes: BTreeSet<String>,
    pub created_by: String,
}

impl From<ApiKeyInfo> for ApiKeyClaims {
    fn from(info: ApiKeyInfo) -> Self {
        Self {
            key_id: info.id,
            name: info.name,
            version: info.version,
            scopes: info.scopes,
            created_by: info.created_by,
        }
    }
}

impl ApiKeyClaims {
    /// `Forbidden` listing whichever of `required` the key lacks.
    pub fn require(&self, required: &[&str]) -> Result<()> {
        check_scopes(&self.scopes, required)
    }
}

impl FromRequest for ApiKeyClaims {
    type Error = Error;
    type Future = Ready<std::result::Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<ApiKeyClaims>()
                .cloned()
                .ok_or_else(|| CredentialError::Invalid.into()),
        )
    }
}

fn misconfigured(what: &str) -> HttpResponse {
    warn!("{} missing from app data", what);
    error_response(http::StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

/// Reject requests without a valid API key; on success the key's
/// [`ApiKeyClaims`] are available to handlers.
pub async fn api_key_middleware<B: MessageBody + 'static>(
    req: ServiceRequest,
    next: Next<B>,
) -> std::result::Result<ServiceResponse<BoxBody>, Error> {
    let Some(manager) = req.app_data::<web::Data<ApiKeyManager>>().cloned() else {
        let resp = misconfigured("ApiKeyManager");
        return Ok(req.into_response(resp));
    };
    let transport = req
        .app_data::<web::Data<ApiKeyTransport>>()
        .map(|t| t.get_ref().clone())
        .unwrap_or_default();

    let outcome = extract_api_key(req.request(), &transport)
        .ok_or(CredentialError::Invalid)
        .and_then(|key| manager.validate_key(&key));

    match outcome {
        Ok(info) => {
            debug!(key_id = %info.id, path = %req.path(), "API key accepted");
            req.extensions_mut().insert(ApiKeyClaims::from(info));
            Ok(next.call(req).await?.map_into_boxed_body())
        }
        Err(e) => {
            debug!(path = %req.path(), reason = e.kind(), "API key rejected");
            let resp = e.error_response();
            Ok(req.into_response(resp))
        }
    }
}

// ==============================
// CSRF
// ==============================

/// The session's current CSRF token, exposed to handlers by
/// [`csrf_middleware`]. After a state-changing request this is the fresh
/// replacement token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl FromRequest for CsrfToken {
    type Error = Error;
    type Future = Ready<std::result::Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<CsrfToken>()
                .cloned()
                .ok_or_else(|| CredentialError::NotFound("csrf token".into()).into()),
        )
    }
}

pub fn is_safe_method(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE].contains(method)
}

fn same_site(policy: SameSitePolicy) -> SameSite {
    match policy {
        SameSitePolicy::Strict => SameSite::Strict,
        SameSitePolicy::Lax => SameSite::Lax,
        SameSitePolicy::None => SameSite::None,
    }
}

/// Cookie carrying `token`, with max-age equal to the token TTL.
pub fn csrf_cookie(config: &CsrfConfig, token: &str) -> Cookie<'static> {
    let max_age = i64::try_from(config.ttl.as_secs()).unwrap_or(i64::MAX);
    Cookie::build(config.cookie.name.clone(), token.to_string())
        .path(config.cookie.path.clone())
        .secure(config.cookie.secure)
        .http_only(config.cookie.http_only)
        .same_site(same_site(config.cookie.same_site))
        .max_age(CookieDuration::seconds(max_age))
        .finish()
}

fn attach_token<B>(res: &mut ServiceResponse<B>, config: &CsrfConfig, token: &str) {
    if let Err(e) = res.response_mut().add_cookie(&csrf_cookie(config, token)) {
        warn!(error = %e, "failed to set CSRF cookie");
    }
    match (
        HeaderName::from_bytes(config.header_name.as_bytes()),
        HeaderValue::from_str(token),
    ) {
        (Ok(name), Ok(value)) => {
            res.headers_mut().insert(name, value);
        }
        _ => warn!(header = %config.header_name, "failed to set CSRF header"),
    }
}

fn session_id(req: &HttpRequest, config: &CsrfConfig) -> Option<String> {
    req.cookie(&config.session_cookie)
        .map(|c| c.value().trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Enforce CSRF tokens for cookie-authenticated sessions.
///
/// Safe methods get the session's live token (issued if missing or expired)
/// as a cookie and response header. Unsafe methods must present the token in
/// the configured header or, for urlencoded forms, the configured form field;
/// it is spent on success and the replacement is returned the same way. Requests without a session cookie pass through on
/// safe methods and are rejected on unsafe ones.
pub async fn csrf_middleware<B: MessageBody + 'static>(
    mut req: ServiceRequest,
    next: Next<B>,
) -> std::result::Result<ServiceResponse<BoxBody>, Error> {
    let Some(manager) = req.app_data::<web::Data<CsrfManager>>().cloned() else {
        let resp = misconfigured("CsrfManager");
        return Ok(req.into_response(resp));
    };
    let config = manager.config();

    if config.is_exempt(req.path()) {
        return Ok(next.call(req).await?.map_into_boxed_body());
    }

    let safe = is_safe_method(req.method());
    let Some(session) = session_id(req.request(), config) else {
        if safe {
            return Ok(next.call(req).await?.map_into_boxed_body());
        }
        debug!(path = %req.path(), "CSRF rejected: no session");
        let resp = CredentialError::Invalid.error_response();
        return Ok(req.into_response(resp));
    };

    let outcome = if safe {
        manager.ensure_token(&session)
    } else {
        let presented = presented_token(&mut req, config).await?;
        manager.consume_token(&session, &presented)
    };

    match outcome {
        Ok(token) => {
            req.extensions_mut().insert(CsrfToken(token.clone()));
            let mut res = next.call(req).await?.map_into_boxed_body();
            // The handler may have revoked the session (logout).
            if manager.validate_token(&session, &token) {
                attach_token(&mut res, config, &token);
            }
            Ok(res)
        }
        Err(e) => {
            debug!(path = %req.path(), reason = e.kind(), "CSRF rejected");
            let resp = e.error_response();
            Ok(req.into_response(resp))
        }
    }
}

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Token presented by an unsafe request: the configured header, or the form
/// field of an urlencoded body when the header is absent. The body is put
/// back for the handler.
async fn presented_token(
    req: &mut ServiceRequest,
    config: &CsrfConfig,
) -> std::result::Result<String, Error> {
    let header = req
        .headers()
        .get(config.header_name.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    if let Some(t) = header {
        return Ok(t);
    }
    if req.content_type() != FORM_CONTENT_TYPE {
        return Ok(String::new());
    }

    let body = req.extract::<web::Bytes>().await?;
    let token = form_field(&body, &config.form_field).unwrap_or_default();
    req.set_payload(Payload::from(body));
    Ok(token)
}

/// Value of `field` in an urlencoded body.
pub fn form_field(body: &[u8], field: &str) -> Option<String> {
    let raw = std::str::from_utf8(body).ok()?;
    web::Query::<HashMap<String, String>>::from_query(raw)
        .ok()?
        .into_inner()
        .remove(field)
        .map(|v| v.trim().to_string())
}
