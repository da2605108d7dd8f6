//! Authentication types shared by gateway implementations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jwt;

/// Identity issued by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    /// Free-form metadata supplied at sign-up
    #[serde(default)]
    pub user_metadata: Value,
}

/// A signed-in session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as a unix timestamp in seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl AuthSession {
    /// Expiry of the access token, from the session or from the token itself
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        let seconds = match self.expires_at {
            Some(seconds) => seconds,
            None => jwt::decode_unverified(&self.access_token)
                .ok()
                .map(|claims| claims.exp as i64)?,
        };
        DateTime::from_timestamp(seconds, 0)
    }

    /// True if the access token expires within `leeway_secs`
    ///
    /// A session whose expiry cannot be determined is treated as valid; the
    /// backend rejects it if it is not.
    pub fn is_expired(&self, leeway_secs: i64) -> bool {
        match self.expiry() {
            Some(expiry) => Utc::now() + chrono::Duration::seconds(leeway_secs) >= expiry,
            None => false,
        }
    }
}

/// Result of a sign-up: the new user, plus a session when the backend signs
/// the user in immediately
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: AuthUser,
    pub session: Option<AuthSession>,
}

/// Session change notification
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "signed_in",
            AuthEvent::TokenRefreshed(_) => "token_refreshed",
            AuthEvent::SignedOut => "signed_out",
        }
    }

    /// Session carried by the event, if any
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => Some(session),
            AuthEvent::SignedOut => None,
        }
    }
}
