//! HTTP gateway to the hosted backend

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

use common::{GatewayConfig, GatewayError, GatewayResult};

use crate::auth::{AuthEvent, AuthSession, AuthUser, SignUpOutcome};
use crate::jwt;
use crate::query::{Filter, Select, Selection, Table};
use crate::{AuthApi, ObjectStorage, RecordStore};

/// Refresh access tokens this many seconds before they expire
const EXPIRY_LEEWAY_SECS: i64 = 30;

/// Gateway speaking the backend's REST, auth and storage protocols
#[derive(Clone)]
pub struct RestGateway {
    client: Client,
    base_url: String,
    anon_key: String,
    session: Arc<RwLock<Option<AuthSession>>>,
    refreshing: Arc<Mutex<()>>,
    session_file: Option<PathBuf>,
    events: broadcast::Sender<AuthEvent>,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for AuthSession {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .or_else(|| token.expires_in.map(|secs| Utc::now().timestamp() + secs));
        AuthSession {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: token.user,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserList {
    users: Vec<AuthUser>,
}

impl RestGateway {
    /// Create a gateway for the configured backend
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let mut headers = HeaderMap::new();
        let apikey = HeaderValue::from_str(&config.anon_key)
            .map_err(|_| GatewayError::invalid("anon_key", "not a valid header value"))?;
        headers.insert("apikey", apikey);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(network_error)?;

        let (events, _) = broadcast::channel(16);

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            anon_key: config.anon_key.clone(),
            session: Arc::new(RwLock::new(None)),
            refreshing: Arc::new(Mutex::new(())),
            session_file: config.session_file.clone(),
            events,
        })
    }

    /// Create a gateway and restore the session persisted by an earlier run
    pub async fn connect(config: &GatewayConfig) -> GatewayResult<Self> {
        let gateway = Self::new(config)?;
        gateway.restore_session().await;
        Ok(gateway)
    }

    /// Load the persisted session, if any
    ///
    /// A file that cannot be read, or whose token belongs to a different user
    /// than the one stored next to it, is ignored.
    pub async fn restore_session(&self) -> Option<AuthSession> {
        let path = self.session_file.as_ref()?;
        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read session file {}: {}", path.display(), e);
                return None;
            }
        };

        let session: AuthSession = match serde_json::from_slice(&contents) {
            Ok(session) => session,
            Err(e) => {
                warn!("Ignoring malformed session file {}: {}", path.display(), e);
                return None;
            }
        };

        match jwt::decode_unverified(&session.access_token) {
            Ok(claims) if claims.sub == session.user.id => {
                info!("Restored session for user: {}", session.user.id);
                *self.session.write().await = Some(session.clone());
                Some(session)
            }
            _ => {
                warn!("Discarding persisted session that does not match its user");
                None
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Access token of the current session, refreshed first when it is about
    /// to expire, or the anon key
    async fn bearer(&self) -> GatewayResult<String> {
        Ok(match self.current_session().await? {
            Some(session) => session.access_token,
            None => self.anon_key.clone(),
        })
    }

    async fn request(&self, method: Method, path: &str) -> GatewayResult<RequestBuilder> {
        let token = self.bearer().await?;
        Ok(self
            .client
            .request(method, self.url(path))
            .header(AUTHORIZATION, format!("Bearer {}", token)))
    }

    /// Request authorized with the anon key only
    fn anonymous(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.anon_key)
    }

    async fn set_session(&self, session: Option<AuthSession>, event: AuthEvent) {
        *self.session.write().await = session.clone();
        self.persist(session.as_ref()).await;
        let _ = self.events.send(event);
    }

    async fn persist(&self, session: Option<&AuthSession>) {
        let Some(path) = &self.session_file else {
            return;
        };

        let result = match session {
            Some(session) => match serde_json::to_vec_pretty(session) {
                Ok(contents) => tokio::fs::write(path, contents).await,
                Err(e) => Err(std::io::Error::other(e)),
            },
            None => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };

        if let Err(e) = result {
            warn!("Failed to persist session to {}: {}", path.display(), e);
        }
    }

    async fn write(
        &self,
        method: Method,
        table: Table,
        filter: &Filter,
        body: Option<Value>,
    ) -> GatewayResult<Vec<Value>> {
        let path = format!("/rest/v1/{}", table);
        let mut request = self
            .request(method.clone(), &path)
            .await?
            .query(&filter.to_query_pairs())
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(&body);
        }

        debug!("{} {} with {} predicates", method, path, filter.predicates().len());
        let response = send(request).await?;
        let response = check(response, "request").await?;
        response.json().await.map_err(network_error)
    }
}

#[async_trait]
impl RecordStore for RestGateway {
    async fn select(&self, select: &Select) -> GatewayResult<Selection> {
        let path = format!("/rest/v1/{}", select.table);
        let method = if select.head { Method::HEAD } else { Method::GET };

        let mut params = vec![("select".to_string(), select.columns.clone())];
        params.extend(select.filter.to_query_pairs());
        if let Some(order) = select.order_param() {
            params.push(("order".to_string(), order));
        }

        let mut request = self.request(method, &path).await?.query(&params);
        if select.count.is_some() {
            request = request.header("Prefer", "count=exact");
        }

        debug!("Selecting from {} with {:?}", path, params);
        let response = send(request).await?;
        let response = check(response, "request").await?;

        let count = match select.count {
            Some(_) => content_range_total(&response),
            None => None,
        };
        let rows = if select.head {
            Vec::new()
        } else {
            response.json().await.map_err(network_error)?
        };

        Ok(Selection { rows, count })
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> GatewayResult<Vec<Value>> {
        self.write(Method::POST, table, &Filter::new(), Some(Value::Array(rows)))
            .await
    }

    async fn update(
        &self,
        table: Table,
        patch: Value,
        filter: &Filter,
    ) -> GatewayResult<Vec<Value>> {
        if filter.is_empty() {
            return Err(GatewayError::invalid("filter", "update requires a filter"));
        }
        self.write(Method::PATCH, table, filter, Some(patch)).await
    }

    async fn delete(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<Value>> {
        if filter.is_empty() {
            return Err(GatewayError::invalid("filter", "delete requires a filter"));
        }
        self.write(Method::DELETE, table, filter, None).await
    }
}

#[async_trait]
impl AuthApi for RestGateway {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> GatewayResult<SignUpOutcome> {
        info!("Signing up: {}", email);

        let request = self
            .anonymous(Method::POST, "/auth/v1/signup")
            .json(&json!({ "email": email, "password": password, "data": metadata }));
        let response = check(send(request).await?, "email").await?;
        let body: Value = response.json().await.map_err(network_error)?;

        // Without email confirmation the backend signs the user in at once
        if body.get("access_token").is_some() {
            let token: TokenResponse = parse_body(body)?;
            let session = AuthSession::from(token);
            self.set_session(Some(session.clone()), AuthEvent::SignedIn(session.clone()))
                .await;
            return Ok(SignUpOutcome {
                user: session.user.clone(),
                session: Some(session),
            });
        }

        Ok(SignUpOutcome {
            user: parse_body(body)?,
            session: None,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<AuthSession> {
        info!("Signing in: {}", email);

        let request = self
            .anonymous(Method::POST, "/auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let response = check(send(request).await?, "credentials").await?;
        let token: TokenResponse = response.json().await.map_err(network_error)?;

        let session = AuthSession::from(token);
        self.set_session(Some(session.clone()), AuthEvent::SignedIn(session.clone()))
            .await;
        Ok(session)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        let Some(session) = self.session.read().await.clone() else {
            debug!("Sign out without a session");
            return Ok(());
        };

        info!("Signing out user: {}", session.user.id);
        self.set_session(None, AuthEvent::SignedOut).await;

        let request = self
            .client
            .post(self.url("/auth/v1/logout"))
            .bearer_auth(&session.access_token);
        match check(send(request).await?, "request").await {
            Ok(_) | Err(GatewayError::AuthenticationRequired) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn current_session(&self) -> GatewayResult<Option<AuthSession>> {
        let Some(session) = self.session.read().await.clone() else {
            return Ok(None);
        };

        if !session.is_expired(EXPIRY_LEEWAY_SECS) {
            return Ok(Some(session));
        }

        // Refresh tokens are single use; concurrent requests wait for one refresh
        let _refreshing = self.refreshing.lock().await;
        let Some(session) = self.session.read().await.clone() else {
            return Ok(None);
        };
        if !session.is_expired(EXPIRY_LEEWAY_SECS) {
            return Ok(Some(session));
        }

        debug!("Access token expired, refreshing");
        match self.refresh_session(&session.refresh_token).await {
            Ok(session) => Ok(Some(session)),
            Err(GatewayError::Network(cause)) => Err(GatewayError::Network(cause)),
            Err(e) => {
                warn!("Dropping session that could not be refreshed: {}", e);
                self.set_session(None, AuthEvent::SignedOut).await;
                Ok(None)
            }
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> GatewayResult<AuthSession> {
        let request = self
            .anonymous(Method::POST, "/auth/v1/token")
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));
        let response = check(send(request).await?, "refresh_token").await?;
        let token: TokenResponse = response.json().await.map_err(network_error)?;

        let session = AuthSession::from(token);
        self.set_session(
            Some(session.clone()),
            AuthEvent::TokenRefreshed(session.clone()),
        )
        .await;
        Ok(session)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn list_users(&self) -> GatewayResult<Vec<AuthUser>> {
        let request = self.request(Method::GET, "/auth/v1/admin/users").await?;
        let response = check(send(request).await?, "request").await?;
        let list: UserList = response.json().await.map_err(network_error)?;
        Ok(list.users)
    }
}

#[async_trait]
impl ObjectStorage for RestGateway {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> GatewayResult<()> {
        debug!("Uploading {} bytes to {}/{}", bytes.len(), bucket, path);

        let request = self
            .request(Method::POST, &format!("/storage/v1/object/{}/{}", bucket, path))
            .await?
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes);
        check(send(request).await?, "file").await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.url(&format!("/storage/v1/object/public/{}/{}", bucket, path))
    }
}

/// Map a transport failure to a network error
fn network_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Network(err.to_string())
}

async fn send(request: RequestBuilder) -> GatewayResult<Response> {
    request.send().await.map_err(network_error)
}

/// Turn an unsuccessful response into the matching error kind
///
/// Bad requests are reported against `field`. The storage API answers some
/// failures with HTTP 400 and the real status in a `statusCode` body field.
async fn check(response: Response, field: &str) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
        .to_string();
    let status = body
        .get("statusCode")
        .and_then(Value::as_str)
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(status.as_u16());

    debug!("Backend answered {}: {}", status, message);
    match StatusCode::from_u16(status) {
        Ok(StatusCode::BAD_REQUEST) | Ok(StatusCode::UNPROCESSABLE_ENTITY) => {
            Err(GatewayError::invalid(field, message))
        }
        _ => Err(GatewayError::from_status(status, message)),
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: Value) -> GatewayResult<T> {
    serde_json::from_value(body)
        .map_err(|e| GatewayError::Unknown(format!("Unexpected response body: {}", e)))
}

/// Total from a `Content-Range` header such as `0-24/573` or `*/573`
fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("content-range")
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_range)
}

fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("0-24/573"), Some(573));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[test]
    fn test_public_url() {
        let gateway =
            RestGateway::new(&GatewayConfig::new("https://hub.example.co/", "anon")).unwrap();
        assert_eq!(
            gateway.public_url("avatars", "u1/abc.png"),
            "https://hub.example.co/storage/v1/object/public/avatars/u1/abc.png"
        );
    }

    #[test]
    fn test_token_response_computes_expiry() {
        let token = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: Some(3600),
            expires_at: None,
            user: AuthUser {
                id: uuid::Uuid::new_v4(),
                email: None,
                user_metadata: Value::Null,
            },
        };
        let session = AuthSession::from(token);
        let expires_at = session.expires_at.unwrap();
        assert!(expires_at > Utc::now().timestamp() + 3500);
    }
}
