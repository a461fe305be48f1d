//! Integration tests for the credential managers through the public API.
//!
//! Covers:
//! - Uniqueness of issued secrets
//! - Exactly one active version across rotations, and bounded history
//! - Total revocation
//! - Expiry and sweeping
//! - Concurrent validation against rotation
//! - Uniform client-facing rendering of auth failures

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use keyward::{
    authorize, require_scopes, ApiKeyConfig, ApiKeyManager, CredentialError, CsrfConfig,
    CsrfManager, KeyStatus,
};

fn keys_with(config: ApiKeyConfig) -> ApiKeyManager {
    ApiKeyManager::new(config).unwrap()
}

fn keys() -> ApiKeyManager {
    keys_with(ApiKeyConfig::default())
}

#[test]
fn test_generated_keys_are_unique() {
    let mgr = keys();
    let mut tokens = HashSet::new();
    let mut ids = HashSet::new();
    for i in 0..200 {
        let gen = mgr.generate_key(&format!("k{i}"), ["read"], "tests").unwrap();
        assert!(gen.token.starts_with("kw_"));
        assert!(tokens.insert(gen.token));
        assert!(ids.insert(gen.key.id));
    }
    assert_eq!(mgr.list_keys().len(), 200);
}

#[test]
fn test_rotation_keeps_exactly_one_active_version() {
    let mgr = keys_with(ApiKeyConfig {
        max_versions: 3,
        ..ApiKeyConfig::default()
    });
    let first = mgr.generate_key("svc", ["read", "write"], "ops").unwrap();
    let id = first.key.id.clone();

    let mut tokens = vec![first.token];
    for _ in 0..5 {
        tokens.push(mgr.rotate_key(&id).unwrap().token);
    }

    let versions = mgr.key_versions(&id).unwrap();
    let numbers: Vec<u32> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![4, 5, 6]);
    assert_eq!(versions.iter().filter(|v| v.is_active()).count(), 1);

    let latest = tokens.pop().unwrap();
    let info = mgr.validate_key(&latest).unwrap();
    assert_eq!(info.version, 6);
    assert!(require_scopes(&info, &["read", "write"]));

    // Retained but rotated-away versions report Inactive; pruned ones are unknown.
    assert_eq!(
        mgr.validate_key(&tokens[4]),
        Err(CredentialError::Inactive(id.clone()))
    );
    assert_eq!(mgr.validate_key(&tokens[0]), Err(CredentialError::Invalid));
}

#[test]
fn test_revocation_is_total_and_terminal() {
    let mgr = keys();
    let gen = mgr.generate_key("svc", Vec::<String>::new(), "ops").unwrap();
    let id = gen.key.id.clone();
    let old = gen.token;
    let new = mgr.rotate_key(&id).unwrap().token;

    mgr.revoke_key(&id).unwrap();
    mgr.revoke_key(&id).unwrap();

    for token in [&old, &new] {
        let err = mgr.validate_key(token).unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(err.public_message(), "invalid or expired credentials");
    }
    assert_eq!(mgr.get_key_info(&id).unwrap().status, KeyStatus::Revoked);
    assert!(mgr.get_key_info(&id).unwrap().revoked_at.is_some());
    assert_eq!(mgr.rotate_key(&id).unwrap_err(), CredentialError::Inactive(id));
}

#[test]
fn test_key_expiry_then_sweep_after_revoke() {
    let mgr = keys_with(ApiKeyConfig {
        ttl: Duration::from_millis(100),
        ..ApiKeyConfig::default()
    });
    let gen = mgr.generate_key("short", ["read"], "ops").unwrap();
    assert!(mgr.validate_key(&gen.token).is_ok());

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(
        mgr.validate_key(&gen.token),
        Err(CredentialError::Expired(gen.key.id.clone()))
    );
    // Expired but still active: kept for inspection until revoked.
    assert_eq!(mgr.sweep_expired(), 0);
    assert_eq!(mgr.get_key_info(&gen.key.id).unwrap().status, KeyStatus::Expired);

    mgr.revoke_key(&gen.key.id).unwrap();
    assert_eq!(mgr.sweep_expired(), 1);
    assert!(matches!(
        mgr.get_key_info(&gen.key.id),
        Err(CredentialError::NotFound(_))
    ));
}

#[test]
fn test_scope_authorization() {
    let mgr = keys();
    let gen = mgr.generate_key("reader", ["read"], "ops").unwrap();
    let info = mgr.validate_key(&gen.token).unwrap();
    assert!(authorize(&info, &["read"]).is_ok());
    assert!(authorize(&info, &[]).is_ok());
    assert_eq!(
        authorize(&info, &["read", "admin"]),
        Err(CredentialError::Forbidden(vec!["admin".into()]))
    );
}

#[test]
fn test_concurrent_validate_and_rotate() {
    let mgr = Arc::new(keys_with(ApiKeyConfig {
        max_versions: 50,
        ..ApiKeyConfig::default()
    }));
    let gen = mgr.generate_key("hot", ["read"], "ops").unwrap();
    let id = gen.key.id.clone();
    let original = gen.token;

    let rotator = {
        let mgr = mgr.clone();
        let id = id.clone();
        std::thread::spawn(move || {
            (0..20)
                .map(|_| mgr.rotate_key(&id).unwrap().token)
                .collect::<Vec<_>>()
        })
    };
    let validators: Vec<_> = (0..4)
        .map(|_| {
            let mgr = mgr.clone();
            let token = original.clone();
            let id = id.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    match mgr.validate_key(&token) {
                        Ok(info) => {
                            assert_eq!(info.id, id);
                            assert_eq!(info.version, 1);
                        }
                        Err(e) => assert_eq!(e, CredentialError::Inactive(id.clone())),
                    }
                }
            })
        })
        .collect();

    let rotated = rotator.join().unwrap();
    for v in validators {
        v.join().unwrap();
    }

    let versions = mgr.key_versions(&id).unwrap();
    assert_eq!(versions.len(), 21);
    assert_eq!(versions.iter().filter(|v| v.is_active()).count(), 1);
    let last = rotated.last().unwrap();
    assert_eq!(mgr.validate_key(last).unwrap().version, 21);
}

#[test]
fn test_csrf_rotate_scenario() {
    let mgr = CsrfManager::new(CsrfConfig::default()).unwrap();
    let t1 = mgr.issue_token("sess-a").unwrap();
    assert!(mgr.validate_token("sess-a", &t1));
    let t2 = mgr.rotate_token("sess-a").unwrap();
    assert!(!mgr.validate_token("sess-a", &t1));
    assert!(mgr.validate_token("sess-a", &t2));
}

#[test]
fn test_csrf_expiry_sweep_scenario() {
    let mgr = CsrfManager::new(CsrfConfig {
        ttl: Duration::from_millis(100),
        ..CsrfConfig::default()
    })
    .unwrap();
    let t = mgr.issue_token("sess-b").unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert!(!mgr.validate_token("sess-b", &t));
    assert_eq!(mgr.sweep_expired(), 1);
    assert!(matches!(
        mgr.token_info("sess-b"),
        Err(CredentialError::NotFound(_))
    ));
}

#[test]
fn test_managers_without_runtime_have_no_sweeper() {
    let keys = keys_with(ApiKeyConfig {
        ttl: Duration::from_millis(20),
        ..ApiKeyConfig::default()
    });
    assert!(!keys.sweeper_running());
    assert!(!keys.stop());

    let gen = keys.generate_key("short", ["read"], "ops").unwrap();
    keys.revoke_key(&gen.key.id).unwrap();
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(keys.list_keys().len(), 1);
    assert_eq!(keys.sweep_expired(), 1);
    assert!(keys.list_keys().is_empty());
}

#[tokio::test]
async fn test_managers_shut_down_cleanly() {
    let keys = keys();
    let csrf = CsrfManager::new(CsrfConfig::default()).unwrap();
    assert!(keys.sweeper_running());
    assert!(csrf.sweeper_running());

    assert!(keys.stop());
    keys.shutdown().await;
    csrf.shutdown().await;
    csrf.shutdown().await;
    assert!(!keys.sweeper_running());
    assert!(!csrf.sweeper_running());
}
