//! User repository for the admin user list

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use auth::SessionProvider;
use common::{GatewayResult, QueryCache};
use gateway::{Gateway, Select, Table};

use crate::keys;
use crate::models::{Profile, UserWithProfile, parse_rows};

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    gateway: Arc<dyn Gateway>,
    cache: QueryCache,
    session: SessionProvider,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(gateway: Arc<dyn Gateway>, cache: QueryCache, session: SessionProvider) -> Self {
        Self {
            gateway,
            cache,
            session,
        }
    }

    /// Every user with their profile, optionally filtered by a
    /// case-insensitive email or name substring
    pub async fn list(&self, search: Option<&str>) -> GatewayResult<Vec<UserWithProfile>> {
        self.session.require_admin().await?;

        let search = search.map(str::to_string);
        let gateway = self.gateway.clone();
        self.cache
            .query(keys::admin_users(search.as_deref()), move || async move {
                let users = gateway.list_users().await?;
                let select = Select::from(Table::Profiles);
                let mut profiles: HashMap<Uuid, Profile> =
                    parse_rows::<Profile>("profile", gateway.select(&select).await?.rows)?
                        .into_iter()
                        .map(|profile| (profile.id, profile))
                        .collect();

                Ok(users
                    .into_iter()
                    .map(|user| UserWithProfile {
                        profile: profiles
                            .remove(&user.id)
                            .unwrap_or_else(|| Profile::placeholder(user.id)),
                        id: user.id,
                        email: user.email,
                    })
                    .filter(|user| search.as_deref().is_none_or(|term| user.matches(term)))
                    .collect())
            })
            .await
    }
}
