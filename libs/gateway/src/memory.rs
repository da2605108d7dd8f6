//! In-process backend
//!
//! [`MemoryBackend`] holds the tables, the auth users and the object store.
//! Each [`MemoryGateway`] obtained from it is an independent client with its
//! own session, so several users can act against the same data. Row policies
//! follow the hosted project's configuration:
//!
//! - profiles are readable by everyone and writable by their owner or an
//!   admin; only admins change roles
//! - resources are readable when approved, by their owner, or by an admin;
//!   owners and admins may edit or delete them; only admins change status
//! - reviews are readable by everyone and written by their author
//! - listing auth users needs an admin

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, MutexGuard, RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

use common::{GatewayError, GatewayResult};

use crate::auth::{AuthEvent, AuthSession, AuthUser, SignUpOutcome};
use crate::jwt::{self, AccessClaims};
use crate::query::{Filter, Select, Selection, Table};
use crate::{AVATAR_BUCKET, AuthApi, ObjectStorage, RecordStore};

const TOKEN_SECRET: &[u8] = b"resourcehub-memory-backend";
const TOKEN_TTL_SECS: i64 = 3600;

/// An object held by the in-memory storage
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

struct Account {
    user: AuthUser,
    password: String,
}

#[derive(Default)]
struct State {
    accounts: Vec<Account>,
    tables: HashMap<Table, Vec<Value>>,
    objects: HashMap<String, StoredObject>,
    refresh_tokens: HashMap<String, Uuid>,
    last_timestamp: Option<DateTime<Utc>>,
    failures: VecDeque<GatewayError>,
    latency: Duration,
}

impl State {
    fn rows(&self, table: Table) -> &[Value] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn rows_mut(&mut self, table: Table) -> &mut Vec<Value> {
        self.tables.entry(table).or_default()
    }

    /// Strictly increasing timestamps keep "newest first" orderings stable
    fn timestamp(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn role_of(&self, user_id: Uuid) -> Option<&str> {
        let id = user_id.to_string();
        self.rows(Table::Profiles)
            .iter()
            .find(|row| text(row, "id") == Some(id.as_str()))
            .and_then(|row| text(row, "role"))
    }

    fn caller(&self, session: Option<&AuthSession>) -> GatewayResult<Caller> {
        let Some(session) = session else {
            return Ok(Caller::Anonymous);
        };
        let claims = jwt::verify(&session.access_token, TOKEN_SECRET)?;
        let admin = self.role_of(claims.sub) == Some("admin");
        Ok(Caller::User {
            id: claims.sub,
            admin,
        })
    }

    fn issue_session(&mut self, user: AuthUser, ttl_secs: i64) -> GatewayResult<AuthSession> {
        let now = Utc::now().timestamp();
        let expires_at = now + ttl_secs;
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            role: Some("authenticated".to_string()),
            iat: now.max(0) as u64,
            exp: expires_at.max(0) as u64,
        };
        let access_token = jwt::issue(&claims, TOKEN_SECRET)?;
        let refresh_token = random_token(32);
        self.refresh_tokens.insert(refresh_token.clone(), user.id);

        Ok(AuthSession {
            access_token,
            refresh_token,
            expires_at: Some(expires_at),
            user,
        })
    }

    fn create_account(
        &mut self,
        email: &str,
        password: &str,
        metadata: Value,
        role: &str,
    ) -> GatewayResult<AuthUser> {
        if self
            .accounts
            .iter()
            .any(|account| same_email(account.user.email.as_deref(), email))
        {
            return Err(GatewayError::invalid("email", "User already registered"));
        }

        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            user_metadata: metadata.clone(),
        };
        let now = self.timestamp();
        let profile = json!({
            "id": user.id.to_string(),
            "full_name": metadata.get("full_name").cloned().unwrap_or(json!("")),
            "avatar_url": metadata.get("avatar_url").cloned().unwrap_or(Value::Null),
            "bio": Value::Null,
            "role": role,
            "created_at": now,
            "updated_at": now,
        });
        self.rows_mut(Table::Profiles).push(profile);
        self.accounts.push(Account {
            user: user.clone(),
            password: password.to_string(),
        });
        Ok(user)
    }
}

#[derive(Debug, Clone, Copy)]
enum Caller {
    Anonymous,
    User { id: Uuid, admin: bool },
}

impl Caller {
    fn signed_in(self) -> GatewayResult<(Uuid, bool)> {
        match self {
            Caller::Anonymous => Err(GatewayError::AuthenticationRequired),
            Caller::User { id, admin } => Ok((id, admin)),
        }
    }

    fn can_read(self, table: Table, row: &Value) -> bool {
        match table {
            Table::Profiles | Table::Reviews => true,
            Table::Resources => {
                text(row, "status") == Some("approved")
                    || match self {
                        Caller::User { admin: true, .. } => true,
                        Caller::User { id, .. } => owned_by(row, "user_id", id),
                        Caller::Anonymous => false,
                    }
            }
        }
    }
}

fn text<'a>(row: &'a Value, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn owned_by(row: &Value, column: &str, user_id: Uuid) -> bool {
    text(row, column) == Some(user_id.to_string().as_str())
}

fn same_email(stored: Option<&str>, email: &str) -> bool {
    stored.is_some_and(|stored| stored.eq_ignore_ascii_case(email))
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn require_columns(row: &Value, columns: &[&str]) -> GatewayResult<()> {
    match columns
        .iter()
        .find(|column| row.get(**column).is_none_or(Value::is_null))
    {
        Some(column) => Err(GatewayError::invalid(
            *column,
            "null value violates not-null constraint",
        )),
        None => Ok(()),
    }
}

/// Shared in-memory backend
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    requests: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new client with no session
    pub fn connect(&self) -> MemoryGateway {
        let (events, _) = broadcast::channel(16);
        MemoryGateway {
            backend: self.clone(),
            session: Arc::new(RwLock::new(None)),
            refreshing: Arc::new(Mutex::new(())),
            events,
        }
    }

    /// Register a confirmed user with the given profile role
    pub async fn seed_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: &str,
    ) -> GatewayResult<Uuid> {
        let mut state = self.state.lock().await;
        let user = state.create_account(
            email,
            password,
            json!({ "full_name": full_name }),
            role,
        )?;
        Ok(user.id)
    }

    /// Store a row as is, bypassing row policies; `id` and `created_at` are
    /// filled when absent
    pub async fn seed_row(&self, table: Table, mut row: Value) -> Value {
        let mut state = self.state.lock().await;
        let now = state.timestamp();
        if let Some(fields) = row.as_object_mut() {
            fields
                .entry("id")
                .or_insert_with(|| json!(Uuid::new_v4().to_string()));
            fields.entry("created_at").or_insert_with(|| json!(now));
        }
        state.rows_mut(table).push(row.clone());
        row
    }

    /// Sign a session for an existing user that expires in `ttl_secs`
    pub async fn issue_session(&self, user_id: Uuid, ttl_secs: i64) -> GatewayResult<AuthSession> {
        let mut state = self.state.lock().await;
        let user = state
            .accounts
            .iter()
            .find(|account| account.user.id == user_id)
            .map(|account| account.user.clone())
            .ok_or_else(|| GatewayError::not_found("user", user_id))?;
        state.issue_session(user, ttl_secs)
    }

    /// Delay every request by `latency`
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Fail the next request with `error`
    pub async fn fail_next(&self, error: GatewayError) {
        self.state.lock().await.failures.push_back(error);
    }

    /// Number of requests served so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Every row of a table, ignoring policies
    pub async fn rows(&self, table: Table) -> Vec<Value> {
        self.state.lock().await.rows(table).to_vec()
    }

    pub async fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        let key = format!("{}/{}", bucket, path);
        self.state.lock().await.objects.get(&key).cloned()
    }

    async fn begin(&self) -> GatewayResult<MutexGuard<'_, State>> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let latency = self.state.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        match state.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

/// One client of a [`MemoryBackend`]
#[derive(Clone)]
pub struct MemoryGateway {
    backend: MemoryBackend,
    session: Arc<RwLock<Option<AuthSession>>>,
    refreshing: Arc<Mutex<()>>,
    events: broadcast::Sender<AuthEvent>,
}

impl MemoryGateway {
    pub fn backend(&self) -> &MemoryBackend {
        &self.backend
    }

    /// Attach a session obtained elsewhere without emitting an event
    pub async fn restore_session(&self, session: AuthSession) {
        *self.session.write().await = Some(session);
    }

    async fn stored_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    /// Session to act with, refreshed first when its token has expired
    async fn session(&self) -> GatewayResult<Option<AuthSession>> {
        self.current_session().await
    }

    async fn set_session(&self, session: Option<AuthSession>, event: AuthEvent) {
        *self.session.write().await = session;
        let _ = self.events.send(event);
    }

    fn check_insert(
        state: &mut State,
        table: Table,
        caller: Uuid,
        row: Value,
    ) -> GatewayResult<Value> {
        let Value::Object(mut fields) = row else {
            return Err(GatewayError::invalid("row", "expected an object"));
        };
        let row_owner = fields.get("user_id").and_then(Value::as_str).map(str::to_string);
        if row_owner.as_deref() != Some(caller.to_string().as_str()) {
            return Err(GatewayError::denied(format!(
                "new row violates row-level security policy for table \"{}\"",
                table
            )));
        }

        let now = state.timestamp();
        fields
            .entry("id")
            .or_insert_with(|| json!(Uuid::new_v4().to_string()));
        fields.insert("created_at".to_string(), json!(now));

        match table {
            Table::Resources => {
                fields.entry("status").or_insert_with(|| json!("pending"));
                fields.insert("updated_at".to_string(), json!(now));
                let row = Value::Object(fields);
                require_columns(&row, &["title", "description", "url", "category"])?;
                Ok(row)
            }
            Table::Reviews => {
                let row = Value::Object(fields);
                require_columns(&row, &["resource_id", "rating"])?;
                let rating = row.get("rating").and_then(Value::as_i64).unwrap_or(0);
                if !(1..=5).contains(&rating) {
                    return Err(GatewayError::invalid(
                        "rating",
                        "new row violates check constraint \"reviews_rating_check\"",
                    ));
                }
                let resource_exists = state
                    .rows(Table::Resources)
                    .iter()
                    .any(|resource| resource.get("id") == row.get("resource_id"));
                if !resource_exists {
                    return Err(GatewayError::Conflict(
                        "insert violates foreign key constraint \"reviews_resource_id_fkey\""
                            .to_string(),
                    ));
                }
                Ok(row)
            }
            Table::Profiles => Err(GatewayError::denied(
                "profiles are created by the backend at sign-up",
            )),
        }
    }

    fn check_update(
        table: Table,
        row: &Value,
        patch: &Map<String, Value>,
        caller: Uuid,
        admin: bool,
    ) -> GatewayResult<()> {
        let changes = |column: &str| {
            patch
                .get(column)
                .is_some_and(|value| row.get(column) != Some(value))
        };
        let owner_column = if table == Table::Profiles { "id" } else { "user_id" };

        if !admin && !owned_by(row, owner_column, caller) {
            return Err(GatewayError::denied(format!(
                "permission denied for {} row",
                table
            )));
        }
        if changes("id") || changes("user_id") {
            return Err(GatewayError::denied("ownership columns are immutable"));
        }
        if !admin && (changes("role") || (table == Table::Resources && changes("status"))) {
            return Err(GatewayError::denied(format!(
                "only admins may change this {} column",
                table
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryGateway {
    async fn select(&self, select: &Select) -> GatewayResult<Selection> {
        let session = self.session().await?;
        let state = self.backend.begin().await?;
        let caller = state.caller(session.as_ref())?;

        let mut rows: Vec<&Value> = state
            .rows(select.table)
            .iter()
            .filter(|row| caller.can_read(select.table, row) && select.filter.matches(row))
            .collect();
        rows.sort_by(|a, b| select.compare(a, b));

        debug!("Selected {} rows from {}", rows.len(), select.table);
        let count = select.count.map(|_| rows.len() as u64);
        let rows = if select.head {
            Vec::new()
        } else {
            rows.into_iter().map(|row| select.project(row)).collect()
        };

        Ok(Selection { rows, count })
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> GatewayResult<Vec<Value>> {
        let session = self.session().await?;
        let mut state = self.backend.begin().await?;
        let (caller, _) = state.caller(session.as_ref())?.signed_in()?;

        let prepared = rows
            .into_iter()
            .map(|row| Self::check_insert(&mut state, table, caller, row))
            .collect::<GatewayResult<Vec<_>>>()?;

        debug!("Inserted {} rows into {}", prepared.len(), table);
        state.rows_mut(table).extend(prepared.iter().cloned());
        Ok(prepared)
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
        let Value::Object(patch) = patch else {
            return Err(GatewayError::invalid("patch", "expected an object"));
        };

        let session = self.session().await?;
        let mut state = self.backend.begin().await?;
        let caller = state.caller(session.as_ref())?;
        let (caller_id, admin) = caller.signed_in()?;

        let targets: Vec<usize> = state
            .rows(table)
            .iter()
            .enumerate()
            .filter(|(_, row)| caller.can_read(table, row) && filter.matches(row))
            .map(|(index, _)| index)
            .collect();
        for &index in &targets {
            Self::check_update(table, &state.rows(table)[index], &patch, caller_id, admin)?;
        }

        let now = state.timestamp();
        let rows = state.rows_mut(table);
        let mut updated = Vec::with_capacity(targets.len());
        for index in targets {
            if let Some(fields) = rows[index].as_object_mut() {
                for (column, value) in &patch {
                    fields.insert(column.clone(), value.clone());
                }
                if table != Table::Reviews {
                    fields.insert("updated_at".to_string(), json!(now));
                }
            }
            updated.push(rows[index].clone());
        }

        debug!("Updated {} rows in {}", updated.len(), table);
        Ok(updated)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<Value>> {
        if filter.is_empty() {
            return Err(GatewayError::invalid("filter", "delete requires a filter"));
        }

        let session = self.session().await?;
        let mut state = self.backend.begin().await?;
        let caller = state.caller(session.as_ref())?;
        let (caller_id, admin) = caller.signed_in()?;

        if table == Table::Profiles {
            return Err(GatewayError::denied("profiles cannot be deleted"));
        }

        let rows = state.rows(table);
        let doomed: Vec<Value> = rows
            .iter()
            .filter(|row| caller.can_read(table, row) && filter.matches(row))
            .cloned()
            .collect();
        if !admin && doomed.iter().any(|row| !owned_by(row, "user_id", caller_id)) {
            return Err(GatewayError::denied(format!(
                "permission denied for {} row",
                table
            )));
        }

        let ids: Vec<&Value> = doomed.iter().filter_map(|row| row.get("id")).collect();
        state
            .rows_mut(table)
            .retain(|row| !row.get("id").is_some_and(|id| ids.contains(&id)));

        // Reviews go with their resource
        if table == Table::Resources {
            state.rows_mut(Table::Reviews).retain(|review| {
                !review
                    .get("resource_id")
                    .is_some_and(|id| ids.contains(&id))
            });
        }

        debug!("Deleted {} rows from {}", doomed.len(), table);
        Ok(doomed)
    }
}

#[async_trait]
impl AuthApi for MemoryGateway {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> GatewayResult<SignUpOutcome> {
        let session = {
            let mut state = self.backend.begin().await?;
            let user = state.create_account(email, password, metadata, "user")?;
            state.issue_session(user, TOKEN_TTL_SECS)?
        };

        info!("Registered user: {}", session.user.id);
        self.set_session(Some(session.clone()), AuthEvent::SignedIn(session.clone()))
            .await;
        Ok(SignUpOutcome {
            user: session.user.clone(),
            session: Some(session),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<AuthSession> {
        let session = {
            let mut state = self.backend.begin().await?;
            let user = state
                .accounts
                .iter()
                .find(|account| {
                    same_email(account.user.email.as_deref(), email) && account.password == password
                })
                .map(|account| account.user.clone())
                .ok_or_else(|| GatewayError::invalid("credentials", "Invalid login credentials"))?;
            state.issue_session(user, TOKEN_TTL_SECS)?
        };

        self.set_session(Some(session.clone()), AuthEvent::SignedIn(session.clone()))
            .await;
        Ok(session)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        let Some(session) = self.stored_session().await else {
            return Ok(());
        };

        {
            let mut state = self.backend.begin().await?;
            state.refresh_tokens.remove(&session.refresh_token);
        }
        self.set_session(None, AuthEvent::SignedOut).await;
        Ok(())
    }

    async fn current_session(&self) -> GatewayResult<Option<AuthSession>> {
        let Some(session) = self.stored_session().await else {
            return Ok(None);
        };
        if !session.is_expired(0) {
            return Ok(Some(session));
        }

        // Refresh tokens are single use; only one caller may spend it
        let _refreshing = self.refreshing.lock().await;
        let Some(session) = self.stored_session().await else {
            return Ok(None);
        };
        if !session.is_expired(0) {
            return Ok(Some(session));
        }

        debug!("Access token expired, refreshing");
        match self.refresh_session(&session.refresh_token).await {
            Ok(session) => Ok(Some(session)),
            Err(GatewayError::Network(cause)) => Err(GatewayError::Network(cause)),
            Err(_) => {
                self.set_session(None, AuthEvent::SignedOut).await;
                Ok(None)
            }
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> GatewayResult<AuthSession> {
        let session = {
            let mut state = self.backend.begin().await?;
            let user_id = state
                .refresh_tokens
                .remove(refresh_token)
                .ok_or_else(|| GatewayError::invalid("refresh_token", "Invalid Refresh Token"))?;
            let user = state
                .accounts
                .iter()
                .find(|account| account.user.id == user_id)
                .map(|account| account.user.clone())
                .ok_or_else(|| GatewayError::not_found("user", user_id))?;
            state.issue_session(user, TOKEN_TTL_SECS)?
        };

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
        let session = self.session().await?;
        let state = self.backend.begin().await?;
        let (_, admin) = state.caller(session.as_ref())?.signed_in()?;
        if !admin {
            return Err(GatewayError::denied("User not allowed"));
        }
        Ok(state
            .accounts
            .iter()
            .map(|account| account.user.clone())
            .collect())
    }
}

#[async_trait]
impl ObjectStorage for MemoryGateway {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> GatewayResult<()> {
        let session = self.session().await?;
        let mut state = self.backend.begin().await?;
        let caller = state.caller(session.as_ref())?;

        let folder = path.split('/').next().unwrap_or_default();
        let allowed = bucket == AVATAR_BUCKET
            && (folder == "avatars"
                || matches!(caller, Caller::User { id, .. } if folder == id.to_string()));
        if !allowed {
            return Err(GatewayError::denied(format!(
                "new object violates row-level security policy for {}/{}",
                bucket, path
            )));
        }

        let key = format!("{}/{}", bucket, path);
        if state.objects.contains_key(&key) {
            return Err(GatewayError::Conflict("The resource already exists".to_string()));
        }

        debug!("Stored {} bytes at {}", bytes.len(), key);
        state.objects.insert(
            key,
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://storage/{}/{}", bucket, path)
    }
}
