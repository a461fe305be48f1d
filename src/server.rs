use actix_web::middleware::from_fn;
use actix_web::{web, HttpRequest, HttpResponse, Responder, ResponseError};
use serde::Deserialize;
use tracing::info;

use crate::adapter::{api_key_middleware, csrf_middleware, ApiKeyClaims, CsrfToken};
use crate::api_keys::ApiKeyManager;
use crate::csrf::CsrfManager;
use crate::error::CredentialError;
use crate::util::error_response;

/// Scope an API key needs to manage other keys.
pub const ADMIN_SCOPE: &str = "keys:admin";

/// Configure Actix-web routes. Expects `web::Data<ApiKeyManager>` and
/// `web::Data<CsrfManager>` (and optionally `web::Data<ApiKeyTransport>`)
/// registered as app data.
pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(status))
        .service(
            web::resource("/whoami")
                .wrap(from_fn(api_key_middleware))
                .route(web::get().to(whoami)),
        )
        .service(
            web::scope("/keys")
                .wrap(from_fn(api_key_middleware))
                .route("", web::get().to(list_keys))
                .route("", web::post().to(generate_key))
                .route("/sweep", web::post().to(sweep))
                .route("/{id}", web::get().to(get_key))
                .route("/{id}/versions", web::get().to(key_versions))
                .route("/{id}/rotate", web::post().to(rotate_key))
                .route("/{id}/revoke", web::post().to(revoke_key)),
        )
        .service(
            web::scope("/session")
                .wrap(from_fn(csrf_middleware))
                .route("/csrf", web::get().to(csrf_token))
                .route("/echo", web::post().to(echo))
                .route("/logout", web::post().to(logout)),
        );
}

/// Key lookups by id answer 404 for unknown ids; everything else renders
/// through the shared error mapping.
fn admin_error(e: CredentialError) -> HttpResponse {
    match e {
        CredentialError::NotFound(_) => {
            error_response(http::StatusCode::NOT_FOUND, "key not found")
        }
        other => other.error_response(),
    }
}

/// Service status and credential counts.
async fn status(
    keys: web::Data<ApiKeyManager>,
    csrf: web::Data<CsrfManager>,
) -> impl Responder {
    let routes = vec![
        "/status",
        "/whoami",
        "/keys",
        "/keys/sweep",
        "/keys/{id}",
        "/keys/{id}/versions",
        "/keys/{id}/rotate",
        "/keys/{id}/revoke",
        "/session/csrf",
        "/session/echo",
        "/session/logout",
    ];
    web::Json(serde_json::json!({
        "name": "keyward",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": routes,
        "api_keys": {
            "count": keys.list_keys().len(),
            "sweeper_running": keys.sweeper_running(),
        },
        "csrf": {
            "sessions": csrf.session_count(),
            "sweeper_running": csrf.sweeper_running(),
        }
    }))
}

async fn whoami(claims: ApiKeyClaims) -> impl Responder {
    web::Json(claims)
}

#[derive(Debug, Deserialize)]
struct GenerateKeyRequest {
    name: String,
    #[serde(default)]
    scopes: Vec<String>,
}

async fn generate_key(
    claims: ApiKeyClaims,
    keys: web::Data<ApiKeyManager>,
    body: web::Json<GenerateKeyRequest>,
) -> HttpResponse {
    if let Err(e) = claims.require(&[ADMIN_SCOPE]) {
        return e.error_response();
    }
    let payload = body.into_inner();
    match keys.generate_key(&payload.name, payload.scopes, &claims.key_id) {
        Ok(gen) => HttpResponse::Created().json(gen),
        Err(e) => e.error_response(),
    }
}

async fn list_keys(claims: ApiKeyClaims, keys: web::Data<ApiKeyManager>) -> HttpResponse {
    if let Err(e) = claims.require(&[ADMIN_SCOPE]) {
        return e.error_response();
    }
    HttpResponse::Ok().json(keys.list_keys())
}

async fn get_key(
    claims: ApiKeyClaims,
    keys: web::Data<ApiKeyManager>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(e) = claims.require(&[ADMIN_SCOPE]) {
        return e.error_response();
    }
    match keys.get_key_info(&path) {
        Ok(info) => HttpResponse::Ok().json(info),
        Err(e) => admin_error(e),
    }
}

async fn key_versions(
    claims: ApiKeyClaims,
    keys: web::Data<ApiKeyManager>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(e) = claims.require(&[ADMIN_SCOPE]) {
        return e.error_response();
    }
    match keys.key_versions(&path) {
        Ok(versions) => HttpResponse::Ok().json(versions),
        Err(e) => admin_error(e),
    }
}

async fn rotate_key(
    claims: ApiKeyClaims,
    keys: web::Data<ApiKeyManager>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(e) = claims.require(&[ADMIN_SCOPE]) {
        return e.error_response();
    }
    match keys.rotate_key(&path) {
        Ok(gen) => {
            info!(key_id = %gen.key.id, by = %claims.key_id, "key rotated via admin API");
            HttpResponse::Ok().json(gen)
        }
        Err(e) => admin_error(e),
    }
}

async fn revoke_key(
    claims: ApiKeyClaims,
    keys: web::Data<ApiKeyManager>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Err(e) = claims.require(&[ADMIN_SCOPE]) {
        return e.error_response();
    }
    let id = path.into_inner();
    match keys.revoke_key(&id) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "revoked": true, "id": id })),
        Err(e) => admin_error(e),
    }
}

async fn sweep(
    claims: ApiKeyClaims,
    keys: web::Data<ApiKeyManager>,
    csrf: web::Data<CsrfManager>,
) -> HttpResponse {
    if let Err(e) = claims.require(&[ADMIN_SCOPE]) {
        return e.error_response();
    }
    HttpResponse::Ok().json(serde_json::json!({
        "api_keys_removed": keys.sweep_expired(),
        "csrf_tokens_removed": csrf.sweep_expired(),
    }))
}

async fn csrf_token(token: Option<CsrfToken>) -> HttpResponse {
    match token {
        Some(CsrfToken(t)) => HttpResponse::Ok().json(serde_json::json!({ "csrf_token": t })),
        None => error_response(http::StatusCode::UNAUTHORIZED, "no session"),
    }
}

async fn echo(body: web::Json<serde_json::Value>) -> impl Responder {
    web::Json(serde_json::json!({ "accepted": body.into_inner() }))
}

async fn logout(req: HttpRequest, csrf: web::Data<CsrfManager>) -> HttpResponse {
    let revoked = req
        .cookie(&csrf.config().session_cookie)
        .map(|c| csrf.revoke_token(c.value()))
        .unwrap_or(false);
    HttpResponse::Ok().json(serde_json::json!({ "logged_out": revoked }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeyConfig, CsrfConfig};
    use actix_web::cookie::Cookie;
    use actix_web::test::{
        call_and_read_body_json, call_service, init_service, read_body_json, TestRequest,
    };
    use actix_web::App;

    fn managers() -> (web::Data<ApiKeyManager>, web::Data<CsrfManager>) {
        (
            web::Data::new(ApiKeyManager::new(ApiKeyConfig::default()).unwrap()),
            web::Data::new(CsrfManager::new(CsrfConfig::default()).unwrap()),
        )
    }

    macro_rules! app {
        ($keys:expr, $csrf:expr) => {
            init_service(
                App::new()
                    .app_data($keys.clone())
                    .app_data($csrf.clone())
                    .configure(config_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn status_is_public() {
        let (keys, csrf) = managers();
        let app = app!(keys, csrf);
        let req = TestRequest::get().uri("/status").to_request();
        let body: serde_json::Value = call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], "keyward");
        assert_eq!(body["api_keys"]["count"], 0);
    }

    #[actix_web::test]
    async fn admin_key_lifecycle() {
        let (keys, csrf) = managers();
        let admin = keys.generate_key("admin", [ADMIN_SCOPE], "bootstrap").unwrap();
        let app = app!(keys, csrf);
        let auth = ("Authorization", format!("Bearer {}", admin.token));

        let req = TestRequest::post()
            .uri("/keys")
            .insert_header(auth.clone())
            .set_json(serde_json::json!({ "name": "ci", "scopes": ["read"] }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 201);
        let created: serde_json::Value = read_body_json(resp).await;
        let id = created["key"]["id"].as_str().unwrap().to_string();
        let first_token = created["token"].as_str().unwrap().to_string();
        assert_eq!(created["key"]["created_by"], admin.key.id);

        let req = TestRequest::post()
            .uri(&format!("/keys/{id}/rotate"))
            .insert_header(auth.clone())
            .to_request();
        let rotated: serde_json::Value = call_and_read_body_json(&app, req).await;
        assert_eq!(rotated["key"]["version"], 2);
        assert_ne!(rotated["token"].as_str().unwrap(), first_token);

        let req = TestRequest::get()
            .uri(&format!("/keys/{id}/versions"))
            .insert_header(auth.clone())
            .to_request();
        let versions: serde_json::Value = call_and_read_body_json(&app, req).await;
        assert_eq!(versions.as_array().map(Vec::len), Some(2));

        let req = TestRequest::post()
            .uri(&format!("/keys/{id}/revoke"))
            .insert_header(auth.clone())
            .to_request();
        assert!(call_service(&app, req).await.status().is_success());

        let req = TestRequest::get()
            .uri(&format!("/keys/{id}"))
            .insert_header(auth.clone())
            .to_request();
        let info: serde_json::Value = call_and_read_body_json(&app, req).await;
        assert_eq!(info["status"], "revoked");

        let req = TestRequest::get()
            .uri("/keys/key_missing")
            .insert_header(auth)
            .to_request();
        assert_eq!(call_service(&app, req).await.status().as_u16(), 404);
    }

    #[actix_web::test]
    async fn non_admin_key_is_forbidden() {
        let (keys, csrf) = managers();
        let reader = keys.generate_key("reader", ["read"], "ops").unwrap();
        let app = app!(keys, csrf);

        let req = TestRequest::get()
            .uri("/keys")
            .insert_header(("X-API-Key", reader.token.clone()))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 403);

        let req = TestRequest::get()
            .uri("/whoami")
            .insert_header(("X-API-Key", reader.token))
            .to_request();
        let body: serde_json::Value = call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], "reader");
    }

    #[actix_web::test]
    async fn session_flow_and_logout() {
        let (keys, csrf) = managers();
        let app = app!(keys, csrf);
        let session = Cookie::new("session_id", "sess-9");

        let req = TestRequest::get()
            .uri("/session/csrf")
            .cookie(session.clone())
            .to_request();
        let body: serde_json::Value = call_and_read_body_json(&app, req).await;
        let token = body["csrf_token"].as_str().unwrap().to_string();

        let req = TestRequest::post()
            .uri("/session/echo")
            .cookie(session.clone())
            .insert_header(("X-CSRF-Token", token.clone()))
            .set_json(serde_json::json!({ "n": 1 }))
            .to_request();
        let resp = call_service(&app, req).await;
        assert!(resp.status().is_success());
        let next = resp
            .headers()
            .get("X-CSRF-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap();

        let req = TestRequest::post()
            .uri("/session/logout")
            .cookie(session)
            .insert_header(("X-CSRF-Token", next))
            .to_request();
        let resp = call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert!(resp.headers().get("X-CSRF-Token").is_none());
        assert_eq!(csrf.session_count(), 0);
    }
}
