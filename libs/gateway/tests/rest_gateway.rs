use std::collections::HashMap;

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use common::{GatewayConfig, GatewayError};
use gateway::jwt::{self, AccessClaims};
use gateway::{AuthApi, AuthEvent, AuthSession, AuthUser, Filter, ObjectStorage, RecordStore, RestGateway, Select, Table};

const USER_ID: &str = "6f1d2a8e-3c4b-4e5f-9a0b-1c2d3e4f5a6b";

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn echo_select(
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    (
        [("content-range", "0-0/7")],
        Json(json!([{
            "params": params,
            "prefer": header(&headers, "prefer"),
            "apikey": header(&headers, "apikey"),
            "authorization": header(&headers, "authorization"),
        }])),
    )
}

fn access_token(exp_offset: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = AccessClaims {
        sub: Uuid::parse_str(USER_ID).unwrap(),
        email: Some("ada@example.com".to_string()),
        role: Some("authenticated".to_string()),
        iat: now as u64,
        exp: (now + exp_offset) as u64,
    };
    jwt::issue(&claims, b"server-side secret").unwrap()
}

async fn token(Json(body): Json<Value>) -> Response {
    let granted = body["password"] == "secret1" || body["refresh_token"] == "refresh-1";
    if !granted {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials",
            })),
        )
            .into_response();
    }

    Json(json!({
        "access_token": access_token(3600),
        "refresh_token": "refresh-1",
        "expires_in": 3600,
        "user": {"id": USER_ID, "email": "ada@example.com"},
    }))
    .into_response()
}

async fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "code": "42501",
            "message": "new row violates row-level security policy for table \"resources\"",
        })),
    )
        .into_response()
}

fn router() -> Router {
    Router::new()
        .route("/rest/v1/resources", get(echo_select).post(forbidden))
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/logout", post(|| async { StatusCode::NO_CONTENT }))
}

#[tokio::test]
async fn test_select_encodes_filters_and_reads_count() {
    let base = spawn(router()).await;
    let gateway = RestGateway::new(&GatewayConfig::new(&base, "anon-key")).unwrap();

    let select = Select::from(Table::Resources)
        .filter(
            Filter::new()
                .eq("status", "approved")
                .contains("title", "ai"),
        )
        .newest_first();
    let mut counted = select.clone();
    counted.count = Some(gateway::CountMode::Exact);

    let selection = gateway.select(&counted).await.unwrap();
    assert_eq!(selection.count, Some(7));

    let echoed = &selection.rows[0];
    assert_eq!(echoed["params"]["select"], "*");
    assert_eq!(echoed["params"]["status"], "eq.approved");
    assert_eq!(echoed["params"]["title"], "ilike.%ai%");
    assert_eq!(echoed["params"]["order"], "created_at.desc");
    assert_eq!(echoed["prefer"], "count=exact");
    assert_eq!(echoed["apikey"], "anon-key");
    assert_eq!(echoed["authorization"], "Bearer anon-key");

    let head = gateway
        .select(&Select::from(Table::Resources).count_only())
        .await
        .unwrap();
    assert!(head.rows.is_empty());
    assert_eq!(head.count, Some(7));
}

#[tokio::test]
async fn test_sign_in_attaches_access_token() {
    let base = spawn(router()).await;
    let gateway = RestGateway::new(&GatewayConfig::new(&base, "anon-key")).unwrap();
    let mut events = gateway.subscribe();

    let session = gateway.sign_in("ada@example.com", "secret1").await.unwrap();
    assert_eq!(session.user.id.to_string(), USER_ID);
    assert!(!session.is_expired(30));
    assert!(matches!(events.recv().await.unwrap(), AuthEvent::SignedIn(_)));

    let selection = gateway.select(&Select::from(Table::Resources)).await.unwrap();
    assert_eq!(
        selection.rows[0]["authorization"],
        format!("Bearer {}", session.access_token)
    );

    gateway.sign_out().await.unwrap();
    assert!(gateway.current_session().await.unwrap().is_none());
    assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);

    // Signing out twice is harmless
    gateway.sign_out().await.unwrap();
}

#[tokio::test]
async fn test_backend_errors_map_to_kinds() {
    let base = spawn(router()).await;
    let gateway = RestGateway::new(&GatewayConfig::new(&base, "anon-key")).unwrap();

    let err = gateway
        .insert(Table::Resources, vec![json!({"title": "Tool A"})])
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AuthorizationDenied(ref msg) if msg.contains("row-level")));

    let err = gateway.sign_in("ada@example.com", "wrong").await.unwrap_err();
    assert_eq!(err.field_errors()[0].field, "credentials");
    assert_eq!(err.field_errors()[0].message, "Invalid login credentials");

    let err = gateway
        .update(Table::Resources, json!({"title": "x"}), &Filter::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
}

#[tokio::test]
async fn test_unreachable_backend_is_a_network_error() {
    let gateway = RestGateway::new(&GatewayConfig::new("http://127.0.0.1:1", "anon-key")).unwrap();

    let err = gateway
        .select(&Select::from(Table::Reviews))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Network(_)));
    assert!(gateway.public_url("avatars", "x.png").starts_with("http://127.0.0.1:1/"));
}

#[tokio::test]
async fn test_session_file_survives_restart() {
    let base = spawn(router()).await;
    let path = std::env::temp_dir().join(format!("resourcehub-session-{}.json", Uuid::new_v4()));
    let mut config = GatewayConfig::new(&base, "anon-key");
    config.session_file = Some(path.clone());

    let first = RestGateway::new(&config).unwrap();
    let session = first.sign_in("ada@example.com", "secret1").await.unwrap();
    assert!(path.exists());

    let second = RestGateway::connect(&config).await.unwrap();
    assert_eq!(second.current_session().await.unwrap(), Some(session));

    second.sign_out().await.unwrap();
    assert!(!path.exists());
}

fn expired_session(refresh_token: &str) -> AuthSession {
    AuthSession {
        access_token: access_token(-60),
        refresh_token: refresh_token.to_string(),
        expires_at: Some(Utc::now().timestamp() - 60),
        user: AuthUser {
            id: Uuid::parse_str(USER_ID).unwrap(),
            email: Some("ada@example.com".to_string()),
            user_metadata: Value::Null,
        },
    }
}

#[tokio::test]
async fn test_expired_token_is_refreshed_before_requests() {
    let base = spawn(router()).await;
    let path = std::env::temp_dir().join(format!("resourcehub-session-{}.json", Uuid::new_v4()));
    let mut config = GatewayConfig::new(&base, "anon-key");
    config.session_file = Some(path.clone());

    let expired = expired_session("refresh-1");
    std::fs::write(&path, serde_json::to_vec(&expired).unwrap()).unwrap();
    let gateway = RestGateway::connect(&config).await.unwrap();
    let mut events = gateway.subscribe();

    let selection = gateway.select(&Select::from(Table::Resources)).await.unwrap();
    let AuthEvent::TokenRefreshed(refreshed) = events.recv().await.unwrap() else {
        panic!("expected a refreshed session");
    };
    assert_ne!(refreshed.access_token, expired.access_token);
    assert_eq!(
        selection.rows[0]["authorization"],
        format!("Bearer {}", refreshed.access_token)
    );

    // A refresh token the backend rejects ends the session
    std::fs::write(&path, serde_json::to_vec(&expired_session("revoked")).unwrap()).unwrap();
    let gateway = RestGateway::connect(&config).await.unwrap();
    let mut events = gateway.subscribe();

    let selection = gateway.select(&Select::from(Table::Resources)).await.unwrap();
    assert_eq!(selection.rows[0]["authorization"], "Bearer anon-key");
    assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
    assert!(gateway.current_session().await.unwrap().is_none());
    assert!(!path.exists());
}
