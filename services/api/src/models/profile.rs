//! Profile models

use auth::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Profile row, one per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Profile assumed for a user whose row is missing
    pub fn placeholder(id: Uuid) -> Self {
        Self {
            id,
            full_name: Some(String::new()),
            avatar_url: None,
            bio: None,
            role: Role::User,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or_default()
    }
}

/// Profile edit payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Only admins may set this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl ProfileUpdate {
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    pub fn avatar_url(url: impl Into<String>) -> Self {
        Self {
            avatar_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.bio.is_none()
            && self.avatar_url.is_none()
            && self.role.is_none()
    }
}

/// An auth user combined with their profile row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserWithProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub profile: Profile,
}

impl UserWithProfile {
    /// Case-insensitive substring match on email or full name
    pub fn matches(&self, search: &str) -> bool {
        let needle = search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let email = self.email.as_deref().unwrap_or_default().to_lowercase();
        let name = self.profile.display_name().to_lowercase();
        email.contains(&needle) || name.contains(&needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_with_profile_matches_email_or_name() {
        let mut profile = Profile::placeholder(Uuid::new_v4());
        profile.full_name = Some("Ada Lovelace".to_string());
        let user = UserWithProfile {
            id: profile.id,
            email: Some("ada@Example.com".to_string()),
            profile,
        };

        assert!(user.matches("LOVE"));
        assert!(user.matches("example"));
        assert!(user.matches(""));
        assert!(!user.matches("grace"));
    }

    #[test]
    fn test_profile_update_serializes_only_set_fields() {
        let update = ProfileUpdate::role(Role::Admin);
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({"role": "admin"})
        );
        assert!(ProfileUpdate::default().is_empty());
    }
}
