use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use auth::{Role, SessionProvider, SignUpRequest};
use common::GatewayError;
use gateway::{AuthApi, MemoryBackend, MemoryGateway};
use tokio_test::{assert_err, assert_ok};

async fn setup() -> (MemoryBackend, Arc<MemoryGateway>, SessionProvider) {
    let backend = MemoryBackend::new();
    backend
        .seed_user("ada@example.com", "secret1", "Ada Lovelace", "user")
        .await
        .unwrap();
    backend
        .seed_user("root@example.com", "secret1", "Root", "admin")
        .await
        .unwrap();
    let gateway = Arc::new(backend.connect());
    let provider = SessionProvider::new(gateway.clone());
    (backend, gateway, provider)
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

#[tokio::test]
async fn test_start_without_session() {
    let (_, _, provider) = setup().await;
    assert!(provider.is_loading().await);

    assert_ok!(provider.start().await);
    assert!(!provider.is_loading().await);
    assert!(provider.current_user().await.is_none());
    assert_eq!(
        provider.require_user().await,
        Err(GatewayError::AuthenticationRequired)
    );
    provider.shutdown();
}

#[tokio::test]
async fn test_start_restores_session_with_profile_role() {
    let (_, gateway, provider) = setup().await;
    gateway.sign_in("root@example.com", "secret1").await.unwrap();

    assert_ok!(provider.start().await);
    let user = provider.current_user().await.unwrap();
    assert_eq!(user.role, Role::Admin);
    assert_eq!(user.full_name, "Root");
    assert!(provider.is_admin().await);
    assert_ok!(provider.require_admin().await);
    provider.shutdown();
}

#[tokio::test]
async fn test_sign_in_validates_before_remote_call() {
    let (backend, _, provider) = setup().await;
    provider.start().await.unwrap();
    let before = backend.request_count();

    let err = assert_err!(provider.sign_in("not-an-email", "").await);
    assert_eq!(err.field_errors().len(), 2);
    assert_eq!(backend.request_count(), before);

    let err = assert_err!(provider.sign_in("ada@example.com", "wrong-password").await);
    assert_eq!(err.field_errors()[0].field, "credentials");
    provider.shutdown();
}

#[tokio::test]
async fn test_listeners_follow_sign_in_and_sign_out() {
    let (_, _, provider) = setup().await;
    provider.start().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let guard = {
        let seen = seen.clone();
        provider.subscribe(move |state| {
            seen.lock()
                .unwrap()
                .push(state.user.as_ref().map(|user| user.full_name.clone()));
        })
    };
    assert_eq!(provider.listener_count(), 1);

    let user = provider.sign_in("ada@example.com", "secret1").await.unwrap();
    assert_eq!(user.role, Role::User);
    assert!(!provider.is_admin().await);
    assert!(matches!(
        provider.require_admin().await,
        Err(GatewayError::AuthorizationDenied(_))
    ));

    provider.sign_out().await.unwrap();
    assert!(provider.current_user().await.is_none());

    // Events echoed back by the gateway do not notify twice
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some("Ada Lovelace".to_string()), None]
    );

    guard.dispose();
    assert_eq!(provider.listener_count(), 0);
    provider.sign_in("ada@example.com", "secret1").await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
    provider.shutdown();
}

#[tokio::test]
async fn test_sign_out_is_idempotent() {
    let (_, _, provider) = setup().await;
    provider.start().await.unwrap();

    assert_ok!(provider.sign_out().await);
    provider.sign_in("ada@example.com", "secret1").await.unwrap();
    assert_ok!(provider.sign_out().await);
    assert_ok!(provider.sign_out().await);
    assert!(provider.current_user().await.is_none());
    provider.shutdown();
}

#[tokio::test]
async fn test_sign_up_validates_and_signs_in() {
    let (backend, _, provider) = setup().await;
    provider.start().await.unwrap();
    let before = backend.request_count();

    let err = assert_err!(
        provider
            .sign_up(SignUpRequest {
                email: "grace@example.com".to_string(),
                password: "12345".to_string(),
                full_name: "Grace Hopper".to_string(),
                avatar_url: None,
            })
            .await
    );
    assert_eq!(err.field_errors()[0].field, "password");
    assert_eq!(backend.request_count(), before);

    let user = provider
        .sign_up(SignUpRequest {
            email: "grace@example.com".to_string(),
            password: "123456".to_string(),
            full_name: "  Grace Hopper ".to_string(),
            avatar_url: Some("memory://storage/avatars/avatars/x.png".to_string()),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.full_name, "Grace Hopper");
    assert_eq!(user.role, Role::User);
    provider.shutdown();
}

#[tokio::test]
async fn test_follows_sessions_changed_elsewhere() {
    let (_, gateway, provider) = setup().await;
    provider.start().await.unwrap();

    let notifications = Arc::new(AtomicUsize::new(0));
    let _guard = {
        let notifications = notifications.clone();
        provider.subscribe(move |_| {
            notifications.fetch_add(1, Ordering::SeqCst);
        })
    };

    gateway.sign_in("ada@example.com", "secret1").await.unwrap();
    eventually(|| async { provider.current_user().await.is_some() }).await;

    gateway.sign_out().await.unwrap();
    eventually(|| async { provider.current_user().await.is_none() }).await;
    assert_eq!(notifications.load(Ordering::SeqCst), 2);

    provider.shutdown();
    gateway.sign_in("ada@example.com", "secret1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(provider.current_user().await.is_none());
}

#[tokio::test]
async fn test_expired_session_is_refreshed_or_dropped() {
    let (backend, gateway, provider) = setup().await;
    let ada = backend
        .seed_user("late@example.com", "secret1", "Late", "user")
        .await
        .unwrap();

    gateway
        .restore_session(backend.issue_session(ada, -120).await.unwrap())
        .await;
    provider.start().await.unwrap();
    assert_eq!(provider.current_user().await.unwrap().id, ada);
    provider.shutdown();

    let mut revoked = backend.issue_session(ada, -120).await.unwrap();
    revoked.refresh_token = "revoked".to_string();
    let gateway = Arc::new(backend.connect());
    gateway.restore_session(revoked).await;
    let provider = SessionProvider::new(gateway);
    assert_ok!(provider.start().await);
    assert!(provider.current_user().await.is_none());
    provider.shutdown();
}

#[tokio::test]
async fn test_reload_user_picks_up_role_change() {
    let (backend, _, provider) = setup().await;
    provider.start().await.unwrap();
    let user = provider.sign_in("ada@example.com", "secret1").await.unwrap();

    let admin = backend.connect();
    admin.sign_in("root@example.com", "secret1").await.unwrap();
    gateway::RecordStore::update(
        &admin,
        gateway::Table::Profiles,
        serde_json::json!({"role": "admin"}),
        &gateway::Filter::new().eq("id", user.id.to_string()),
    )
    .await
    .unwrap();

    let reloaded = provider.reload_user().await.unwrap().unwrap();
    assert_eq!(reloaded.role, Role::Admin);
    assert!(provider.is_admin().await);
    provider.shutdown();
}
