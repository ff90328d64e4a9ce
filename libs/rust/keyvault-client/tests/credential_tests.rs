//! Federated credential against a fake identity provider.

use keyvault_client::{
    CredentialConfig, FederatedCredential, KeyVaultError, ScopeKey, TokenCredential,
};
use rust_common::HttpConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TENANT: &str = "00000000-0000-0000-0000-00000000cafe";
const CLIENT: &str = "11111111-2222-3333-4444-555555555555";

fn token_path() -> String {
    format!("/{TENANT}/oauth2/v2.0/token")
}

fn token_file(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("federated-token-{}", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

fn credential(server: &MockServer, token_file: &PathBuf) -> FederatedCredential {
    credential_with(server, token_file, |c| c)
}

fn credential_with(
    server: &MockServer,
    token_file: &PathBuf,
    tweak: impl FnOnce(CredentialConfig) -> CredentialConfig,
) -> FederatedCredential {
    let config = CredentialConfig::new(TENANT, CLIENT, server.uri(), token_file.clone())
        .with_http(HttpConfig::default().allow_insecure_http());
    FederatedCredential::new(tweak(config)).unwrap()
}

fn token_body(access_token: &str, expires_in: u64) -> serde_json::Value {
    serde_json::json!({
        "token_type": "Bearer",
        "expires_in": expires_in,
        "ext_expires_in": expires_in,
        "access_token": access_token,
    })
}

#[tokio::test]
async fn test_exchange_then_cache_hit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .and(body_string_contains("client_assertion=tok-A"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains(format!("client_id={CLIENT}")))
        .and(body_string_contains("scope=vault.read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let file = token_file("tok-A\n");
    let credential = credential(&server, &file);

    let before = chrono::Utc::now();
    let first = credential.get_token(&["vault.read"]).await.unwrap();
    assert_eq!(first.secret(), "AT1");
    let lifetime = (first.expires_at() - before).num_seconds();
    assert!((3599..=3601).contains(&lifetime), "lifetime {lifetime}");

    let second = credential.get_token(&["vault.read"]).await.unwrap();
    assert_eq!(second.secret(), "AT1");
    assert_eq!(second.expires_at(), first.expires_at());
    assert_eq!(credential.metrics().exchanges.get(), 1);
    assert_eq!(credential.metrics().cache_hits.get(), 1);

    server.verify().await;
    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_scope_order_shares_cache_entry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = credential(&server, &file);

    credential.get_token(&["b.scope", "a.scope"]).await.unwrap();
    credential.get_token(&["a.scope", "b.scope", "a.scope"]).await.unwrap();

    server.verify().await;
    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_distinct_scope_sets_are_cached_separately() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .and(body_string_contains("scope=vault.read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT-read", 3600)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .and(body_string_contains("scope=vault.write"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT-write", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = credential(&server, &file);

    let read = credential.get_token(&["vault.read"]).await.unwrap();
    let write = credential.get_token(&["vault.write"]).await.unwrap();
    assert_eq!(read.secret(), "AT-read");
    assert_eq!(write.secret(), "AT-write");

    server.verify().await;
    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_unreadable_assertion_is_auth_error_and_cache_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let missing = std::env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));
    let credential = credential(&server, &missing);

    let err = credential.get_token(&["vault.read"]).await.unwrap_err();
    assert!(err.is_auth_error());
    assert!(matches!(err, KeyVaultError::AssertionUnavailable { .. }));
    assert_eq!(credential.metrics().exchange_failures.get(), 1);

    // Failed state is not sticky: once the file appears the next call exchanges.
    std::fs::write(&missing, "tok-A").unwrap();
    let token = credential.get_token(&["vault.read"]).await.unwrap();
    assert_eq!(token.secret(), "AT1");

    server.verify().await;
    std::fs::remove_file(missing).ok();
}

#[tokio::test]
async fn test_rejection_never_returns_stale_token() {
    let server = MockServer::start().await;
    // First exchange succeeds with a lifetime inside the safety margin, so the
    // cached token is already stale on the next call.
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT-stale", 60)))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "invalid_client",
            "error_description": "AADSTS700213: No matching federated identity record found.\r\nTrace ID: 1",
            "error_codes": [700_213],
        })))
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = credential(&server, &file);

    let stale = credential.get_token(&["vault.read"]).await.unwrap();
    assert_eq!(stale.secret(), "AT-stale");

    let err = credential.get_token(&["vault.read"]).await.unwrap_err();
    match err {
        KeyVaultError::ExchangeRejected { status, detail } => {
            assert_eq!(status, 401);
            assert!(detail.starts_with("invalid_client: AADSTS700213"));
            assert!(!detail.contains("Trace ID"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_malformed_success_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = credential(&server, &file);

    let err = credential.get_token(&["vault.read"]).await.unwrap_err();
    assert!(matches!(err, KeyVaultError::InvalidResponse(_)));
    assert!(err.is_auth_error());

    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_exchange_bounded_by_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("AT1", 3600))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = credential_with(&server, &file, |c| {
        c.with_exchange_timeout(Duration::from_millis(200))
    });

    let err = credential.get_token(&["vault.read"]).await.unwrap_err();
    assert!(err.is_auth_error());
    assert!(matches!(
        err,
        KeyVaultError::Timeout(_) | KeyVaultError::Unavailable(_)
    ));

    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_concurrent_callers_share_one_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("AT1", 3600))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = Arc::new(credential(&server, &file));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let credential = Arc::clone(&credential);
        handles.push(tokio::spawn(async move {
            credential.get_token(&["vault.read"]).await
        }));
    }

    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token.secret(), "AT1");
        assert!(token.is_fresh(Duration::from_secs(300)));
    }

    server.verify().await;
    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_cancelled_waiter_does_not_cancel_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("AT1", 3600))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = credential(&server, &file);
    let key = ScopeKey::new(["vault.read"]).unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), credential.get_token_for(&key)).await;
    assert!(abandoned.is_err(), "caller should have given up first");

    let token = credential.get_token_for(&key).await.unwrap();
    assert_eq!(token.secret(), "AT1");

    server.verify().await;
    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_cached_expiry_never_moves_backwards() {
    let server = MockServer::start().await;
    // Both lifetimes sit inside the margin, so every call refreshes.
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT-long", 2000)))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT-short", 1000)))
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = credential_with(&server, &file, |c| {
        c.with_safety_margin(Duration::from_secs(3000))
    });

    let first = credential.get_token(&["vault.read"]).await.unwrap();
    let second = credential.get_token(&["vault.read"]).await.unwrap();

    assert_eq!(first.secret(), "AT-long");
    assert!(second.expires_at() >= first.expires_at());
    assert_eq!(credential.metrics().exchanges.get(), 2);

    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_rotated_assertion_used_on_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .and(body_string_contains("client_assertion=tok-A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", 60)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .and(body_string_contains("client_assertion=tok-B"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT2", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = credential(&server, &file);

    assert_eq!(credential.get_token(&["vault.read"]).await.unwrap().secret(), "AT1");
    std::fs::write(&file, "tok-B").unwrap();
    assert_eq!(credential.get_token(&["vault.read"]).await.unwrap().secret(), "AT2");

    server.verify().await;
    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_empty_scope_set_rejected() {
    let server = MockServer::start().await;
    let file = token_file("tok-A");
    let credential = credential(&server, &file);

    let err = credential.get_token(&[]).await.unwrap_err();
    assert!(matches!(err, KeyVaultError::InvalidConfig(_)));

    std::fs::remove_file(file).ok();
}

#[test]
fn test_refresh_lost_with_its_runtime_is_retried() {
    let healthy = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let server = healthy.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(token_path()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("AT1", 3600))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        server
    });

    let file = token_file("tok-A");
    let credential = credential(&server, &file);

    // The refresh task is spawned on a runtime that goes away mid-exchange.
    let doomed = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let abandoned = doomed.block_on(async {
        tokio::time::timeout(
            Duration::from_millis(50),
            credential.get_token(&["vault.read"]),
        )
        .await
    });
    assert!(abandoned.is_err());
    drop(doomed);

    for _ in 0..3 {
        let token = healthy.block_on(credential.get_token(&["vault.read"])).unwrap();
        assert_eq!(token.secret(), "AT1");
    }
    assert_eq!(credential.metrics().exchanges.get(), 1);
    assert_eq!(credential.metrics().cache_hits.get(), 2);

    std::fs::remove_file(file).ok();
}

#[tokio::test]
async fn test_lifetime_within_safety_margin_refreshes_every_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT-short", 120)))
        .expect(2)
        .mount(&server)
        .await;

    let file = token_file("tok-A");
    let credential = credential(&server, &file);

    for _ in 0..2 {
        let token = credential.get_token(&["vault.read"]).await.unwrap();
        assert_eq!(token.secret(), "AT-short");
    }
    assert_eq!(credential.metrics().exchanges.get(), 2);
    assert_eq!(credential.metrics().cache_hits.get(), 0);

    server.verify().await;
    std::fs::remove_file(file).ok();
}
