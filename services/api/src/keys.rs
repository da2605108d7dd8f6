//! Query keys of the data accessors
//!
//! Each key starts with its family name so that a mutation can invalidate a
//! whole family with [`family`].

use common::QueryKey;
use uuid::Uuid;

use crate::models::ResourceFilter;

pub const RESOURCES: &str = "resources";
pub const USER_RESOURCES: &str = "user-resources";
pub const ADMIN_RESOURCES: &str = "admin-resources";
pub const ADMIN_USERS: &str = "admin-users";
pub const ADMIN_STATS: &str = "admin-stats";
pub const PROFILE: &str = "profile";
pub const REVIEWS: &str = "reviews";

/// Prefix matching every key of a family
pub fn family(name: &str) -> QueryKey {
    QueryKey::new(name)
}

/// `[resources, search, category]`
pub fn resources(filter: &ResourceFilter) -> QueryKey {
    QueryKey::new(RESOURCES)
        .with_opt(filter.search_term().map(str::to_lowercase))
        .with_opt(filter.category)
}

pub fn user_resources(user_id: Uuid) -> QueryKey {
    QueryKey::new(USER_RESOURCES).with(user_id)
}

pub fn admin_resources() -> QueryKey {
    QueryKey::new(ADMIN_RESOURCES)
}

pub fn admin_users(search: Option<&str>) -> QueryKey {
    let search = search
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty());
    QueryKey::new(ADMIN_USERS).with_opt(search)
}

pub fn admin_stats() -> QueryKey {
    QueryKey::new(ADMIN_STATS)
}

pub fn profile(user_id: Uuid) -> QueryKey {
    QueryKey::new(PROFILE).with(user_id)
}

pub fn reviews(resource_id: Uuid) -> QueryKey {
    QueryKey::new(REVIEWS).with(resource_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    #[test]
    fn test_resource_keys_normalize_search() {
        let a = resources(&ResourceFilter::default().search(" AI ").category(Category::Video));
        let b = resources(&ResourceFilter::default().search("ai").category(Category::Video));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "[resources, ai, video]");
        assert_eq!(
            resources(&ResourceFilter::default()).to_string(),
            "[resources, , ]"
        );
        assert!(a.starts_with(&family(RESOURCES)));
        assert!(!user_resources(Uuid::nil()).starts_with(&family(RESOURCES)));
    }

    #[test]
    fn test_admin_user_keys() {
        assert_eq!(admin_users(Some("  ")), admin_users(None));
        assert_ne!(admin_users(Some("ada")), admin_users(None));
    }
}
