use actix_web::HttpResponse;
use http::StatusCode;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize dotenv and structured tracing based on RUST_LOG.
/// - Supports an explicit env file via KEYWARD_ENV_FILE or DOTENV_PATH
/// - Falls back to default .env discovery
/// - Logs the source used
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["KEYWARD_ENV_FILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none" {
        if let Ok(path) = dotenvy::dotenv() {
            env_source = path.display().to_string();
        }
    }

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,actix_web=info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}

/// Get the bind address for the HTTP server from env or default to 127.0.0.1:8089.
pub fn env_bind_addr() -> String {
    std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8089".into())
}

/// `1|true|yes|on` (case-insensitive) is true; anything else set is false.
pub fn env_truthy(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        }
        Err(_) => default,
    }
}

/// Trimmed, non-empty value of an env var.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|s| s.parse::<T>().ok())
}

/// Comma-separated list; empty items dropped.
pub fn env_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Build a JSON error response with the given HTTP status and message.
pub fn error_response(status: StatusCode, msg: &str) -> HttpResponse {
    let body = serde_json::json!({ "error": { "message": msg } });
    let status = actix_web::http::StatusCode::from_u16(status.as_u16())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_carries_status() {
        let resp = error_response(StatusCode::FORBIDDEN, "nope");
        assert_eq!(resp.status().as_u16(), 403);
    }

    #[test]
    fn env_helpers_parse_values() {
        std::env::set_var("KEYWARD_TEST_UTIL_LIST", " a, ,b ,c");
        assert_eq!(
            env_list("KEYWARD_TEST_UTIL_LIST"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        std::env::set_var("KEYWARD_TEST_UTIL_NUM", " 42 ");
        assert_eq!(env_parse::<u64>("KEYWARD_TEST_UTIL_NUM"), Some(42));
        std::env::set_var("KEYWARD_TEST_UTIL_FLAG", "Yes");
        assert!(env_truthy("KEYWARD_TEST_UTIL_FLAG", false));
        assert!(env_truthy("KEYWARD_TEST_UTIL_MISSING_FLAG", true));
    }
}
