//! Profile repository

use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, warn};
use uuid::Uuid;

use auth::SessionProvider;
use common::{GatewayError, GatewayResult, QueryCache};
use gateway::{AVATAR_BUCKET, Filter, Gateway, Select, Table};

use crate::keys;
use crate::models::{Profile, ProfileUpdate, parse_row, single_row};
use crate::repositories::invalidate_families;
use crate::validation;

/// Folder for avatars uploaded before the account exists
const SIGNUP_AVATAR_FOLDER: &str = "avatars";

/// Profile repository
#[derive(Clone)]
pub struct ProfileRepository {
    gateway: Arc<dyn Gateway>,
    cache: QueryCache,
    session: SessionProvider,
}

impl ProfileRepository {
    /// Create a new profile repository
    pub fn new(gateway: Arc<dyn Gateway>, cache: QueryCache, session: SessionProvider) -> Self {
        Self {
            gateway,
            cache,
            session,
        }
    }

    /// Profile of a user
    pub async fn get(&self, user_id: Uuid) -> GatewayResult<Profile> {
        let select =
            Select::from(Table::Profiles).filter(Filter::new().eq("id", user_id.to_string()));

        let gateway = self.gateway.clone();
        self.cache
            .query(keys::profile(user_id), move || async move {
                let row = gateway
                    .select(&select)
                    .await?
                    .rows
                    .into_iter()
                    .next()
                    .ok_or_else(|| GatewayError::not_found("profile", user_id))?;
                parse_row::<Profile>("profile", row)
            })
            .await
    }

    /// Profile of the current user
    pub async fn get_own(&self) -> GatewayResult<Profile> {
        let user = self.session.require_user().await?;
        self.get(user.id).await
    }

    /// Edit a profile
    ///
    /// Users edit their own profile; admins edit any profile and are the only
    /// ones who may change a role.
    pub async fn update(&self, user_id: Uuid, update: &ProfileUpdate) -> GatewayResult<Profile> {
        validation::validate_profile_update(update)?;
        let user = self.session.require_user().await?;

        if user.id != user_id && !user.is_admin() {
            return Err(GatewayError::denied("You can only edit your own profile"));
        }
        if update.role.is_some() && !user.is_admin() {
            warn!("User {} tried to change a role", user.id);
            return Err(GatewayError::denied("Only administrators can change roles"));
        }

        let update = ProfileUpdate {
            full_name: update.full_name.as_deref().map(|name| name.trim().to_string()),
            bio: update.bio.as_deref().map(|bio| bio.trim().to_string()),
            avatar_url: update.avatar_url.clone(),
            role: update.role,
        };
        let patch = serde_json::to_value(&update)
            .map_err(|e| GatewayError::Unknown(format!("Failed to encode update: {}", e)))?;
        let filter = Filter::new().eq("id", user_id.to_string());
        let rows = self.gateway.update(Table::Profiles, patch, &filter).await?;
        if rows.is_empty() {
            return Err(GatewayError::not_found("profile", user_id));
        }
        let profile: Profile = single_row("profile", rows)?;
        info!("Profile {} updated by {}", user_id, user.id);

        invalidate_families(
            &self.cache,
            &[keys::PROFILE, keys::ADMIN_USERS, keys::ADMIN_RESOURCES],
        )
        .await;
        if user_id == user.id {
            self.session.reload_user().await?;
        }
        Ok(profile)
    }

    /// Upload a picture and make it the current user's avatar
    ///
    /// Every upload gets a fresh file name; earlier pictures stay in storage.
    pub async fn upload_avatar(&self, bytes: Vec<u8>, file_name: &str) -> GatewayResult<Profile> {
        let user = self.session.require_user().await?;
        let url = self
            .store_avatar(&user.id.to_string(), bytes, file_name)
            .await?;
        self.update(user.id, &ProfileUpdate::avatar_url(url)).await
    }

    /// Upload a picture before registering and return its public URL
    pub async fn upload_signup_avatar(&self, bytes: Vec<u8>, file_name: &str) -> GatewayResult<String> {
        self.store_avatar(SIGNUP_AVATAR_FOLDER, bytes, file_name)
            .await
    }

    async fn store_avatar(&self, folder: &str, bytes: Vec<u8>, file_name: &str) -> GatewayResult<String> {
        if bytes.is_empty() {
            return Err(GatewayError::invalid("file", "The selected file is empty"));
        }

        let extension = extension_of(file_name);
        let path = format!("{}/{}.{}", folder, random_name(), extension);
        self.gateway
            .upload(AVATAR_BUCKET, &path, bytes, content_type_of(&extension))
            .await?;
        info!("Stored avatar at {}/{}", AVATAR_BUCKET, path);

        Ok(self.gateway.public_url(AVATAR_BUCKET, &path))
    }
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|extension| extension.to_str())
        .filter(|extension| {
            !extension.is_empty() && extension.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_lowercase)
        .unwrap_or_else(|| "bin".to_string())
}

fn content_type_of(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn random_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}
