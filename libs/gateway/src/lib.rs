//! Remote data gateway
//!
//! A single typed entry point for everything the client asks of the hosted
//! backend: record selection and mutation on the relational tables,
//! authentication, and public object storage. Access control lives in the
//! backend's row policies; this crate only surfaces their outcome as
//! [`GatewayError`] kinds.
//!
//! Two implementations are provided:
//! - [`RestGateway`] talks to the hosted backend over HTTP
//! - [`MemoryBackend`] keeps everything in process and enforces the same
//!   row policies, for tests and offline use

pub mod auth;
pub mod jwt;
pub mod memory;
pub mod query;
pub mod rest;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use common::GatewayResult;

pub use auth::{AuthEvent, AuthSession, AuthUser, SignUpOutcome};
pub use memory::{MemoryBackend, MemoryGateway};
pub use query::{CountMode, Filter, Order, Predicate, Select, Selection, Table};
pub use rest::RestGateway;

/// Bucket holding profile pictures
pub const AVATAR_BUCKET: &str = "avatars";

/// Relational record operations
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run a selection; `count` is filled when the selection asks for it
    async fn select(&self, select: &Select) -> GatewayResult<Selection>;

    /// Insert rows and return them as stored
    async fn insert(&self, table: Table, rows: Vec<Value>) -> GatewayResult<Vec<Value>>;

    /// Apply `patch` to every row matching `filter`; returns the updated rows
    ///
    /// An empty filter is rejected rather than updating the whole table.
    async fn update(&self, table: Table, patch: Value, filter: &Filter)
    -> GatewayResult<Vec<Value>>;

    /// Delete every row matching `filter`; returns the deleted rows
    ///
    /// An empty filter is rejected rather than emptying the table.
    async fn delete(&self, table: Table, filter: &Filter) -> GatewayResult<Vec<Value>>;
}

/// Authentication operations
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> GatewayResult<SignUpOutcome>;

    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<AuthSession>;

    /// End the current session; succeeds when already signed out
    async fn sign_out(&self) -> GatewayResult<()>;

    /// The session currently attached to this gateway
    async fn current_session(&self) -> GatewayResult<Option<AuthSession>>;

    /// Exchange a refresh token for a new session
    async fn refresh_session(&self, refresh_token: &str) -> GatewayResult<AuthSession>;

    /// Receive every session change from now on
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Every registered identity; needs administrative rights
    async fn list_users(&self) -> GatewayResult<Vec<AuthUser>>;
}

/// Public object storage
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` at `path` inside `bucket`; an existing object is a conflict
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> GatewayResult<()>;

    /// Publicly reachable URL of an object
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Everything the client needs from the backend
pub trait Gateway: RecordStore + AuthApi + ObjectStorage {}

impl<T: RecordStore + AuthApi + ObjectStorage> Gateway for T {}
