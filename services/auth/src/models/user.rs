//! User model and related functionality

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::role::Role;

/// The signed-in user as seen by the rest of the application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Fields of the profile row the provider reads for the current user
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ProfileSummary {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Role,
}

/// User login credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Registration payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    /// Public URL of an avatar uploaded before registering
    #[serde(default)]
    pub avatar_url: Option<String>,
}
