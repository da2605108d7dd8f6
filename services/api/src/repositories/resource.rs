//! Resource repository

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use auth::SessionProvider;
use common::{GatewayError, GatewayResult, QueryCache};
use gateway::{Filter, Gateway, Select, Table};

use crate::keys;
use crate::models::{
    NewResource, Profile, Resource, ResourceFilter, ResourceStatus, ResourceUpdate,
    ResourceWithOwner, ResourceWithReviews, Review, average_rating, parse_row, parse_rows,
    single_row,
};
use crate::repositories::invalidate_families;
use crate::validation;

/// Resource repository
#[derive(Clone)]
pub struct ResourceRepository {
    gateway: Arc<dyn Gateway>,
    cache: QueryCache,
    session: SessionProvider,
}

impl ResourceRepository {
    /// Create a new resource repository
    pub fn new(gateway: Arc<dyn Gateway>, cache: QueryCache, session: SessionProvider) -> Self {
        Self {
            gateway,
            cache,
            session,
        }
    }

    /// Approved resources matching the filter, newest first
    pub async fn list_approved(&self, filter: &ResourceFilter) -> GatewayResult<Vec<Resource>> {
        let mut predicates = Filter::new().eq("status", ResourceStatus::Approved.as_str());
        if let Some(term) = filter.search_term() {
            predicates = predicates.contains("title", term);
        }
        if let Some(category) = filter.category {
            predicates = predicates.eq("category", category.as_str());
        }
        let select = Select::from(Table::Resources)
            .filter(predicates)
            .newest_first();

        let gateway = self.gateway.clone();
        self.cache
            .query(keys::resources(filter), move || async move {
                let selection = gateway.select(&select).await?;
                parse_rows("resource", selection.rows)
            })
            .await
    }

    /// The current user's resources with their reviews, newest first
    pub async fn list_own(&self) -> GatewayResult<Vec<ResourceWithReviews>> {
        let user = self.session.require_user().await?;

        let gateway = self.gateway.clone();
        self.cache
            .query(keys::user_resources(user.id), move || async move {
                let select = Select::from(Table::Resources)
                    .filter(Filter::new().eq("user_id", user.id.to_string()))
                    .newest_first();
                let resources: Vec<Resource> =
                    parse_rows("resource", gateway.select(&select).await?.rows)?;
                if resources.is_empty() {
                    return Ok(Vec::new());
                }

                let ids = resources.iter().map(|resource| resource.id.to_string());
                let select = Select::from(Table::Reviews)
                    .filter(Filter::new().is_in("resource_id", ids))
                    .newest_first();
                let reviews: Vec<Review> =
                    parse_rows("review", gateway.select(&select).await?.rows)?;

                let mut by_resource: HashMap<Uuid, Vec<Review>> = HashMap::new();
                for review in reviews {
                    by_resource.entry(review.resource_id).or_default().push(review);
                }

                Ok(resources
                    .into_iter()
                    .map(|resource| {
                        let reviews = by_resource.remove(&resource.id).unwrap_or_default();
                        ResourceWithReviews {
                            average_rating: average_rating(&reviews),
                            resource,
                            reviews,
                        }
                    })
                    .collect())
            })
            .await
    }

    /// Every resource regardless of status, with its owner's name
    pub async fn list_all(&self) -> GatewayResult<Vec<ResourceWithOwner>> {
        self.session.require_admin().await?;

        let gateway = self.gateway.clone();
        self.cache
            .query(keys::admin_resources(), move || async move {
                let select = Select::from(Table::Resources).newest_first();
                let resources: Vec<Resource> =
                    parse_rows("resource", gateway.select(&select).await?.rows)?;
                if resources.is_empty() {
                    return Ok(Vec::new());
                }

                let mut owner_ids: Vec<String> = resources
                    .iter()
                    .map(|resource| resource.user_id.to_string())
                    .collect();
                owner_ids.sort();
                owner_ids.dedup();
                let select = Select::from(Table::Profiles)
                    .filter(Filter::new().is_in("id", owner_ids));
                let owners: HashMap<Uuid, Option<String>> =
                    parse_rows::<Profile>("profile", gateway.select(&select).await?.rows)?
                        .into_iter()
                        .map(|profile| (profile.id, profile.full_name))
                        .collect();

                Ok(resources
                    .into_iter()
                    .map(|resource| ResourceWithOwner {
                        owner_name: owners.get(&resource.user_id).cloned().flatten(),
                        resource,
                    })
                    .collect())
            })
            .await
    }

    /// Look a resource up without caching
    pub async fn find(&self, id: Uuid) -> GatewayResult<Resource> {
        let select =
            Select::from(Table::Resources).filter(Filter::new().eq("id", id.to_string()));
        let row = self
            .gateway
            .select(&select)
            .await?
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::not_found("resource", id))?;
        parse_row("resource", row)
    }

    /// Submit a resource for moderation
    pub async fn create(&self, new: &NewResource) -> GatewayResult<Resource> {
        validation::validate_new_resource(new)?;
        let user = self.session.require_user().await?;

        let row = json!({
            "title": new.title.trim(),
            "description": new.description.trim(),
            "url": new.url.trim(),
            "category": new.category,
            "status": ResourceStatus::Pending,
            "user_id": user.id.to_string(),
        });
        let resource: Resource =
            single_row("resource", self.gateway.insert(Table::Resources, vec![row]).await?)?;
        info!("Resource {} submitted by {}", resource.id, user.id);

        invalidate_families(
            &self.cache,
            &[keys::USER_RESOURCES, keys::ADMIN_RESOURCES, keys::ADMIN_STATS],
        )
        .await;
        Ok(resource)
    }

    /// Edit the fields of one of the current user's resources
    pub async fn update(&self, id: Uuid, update: &ResourceUpdate) -> GatewayResult<Resource> {
        validation::validate_resource_update(update)?;
        let user = self.session.require_user().await?;

        let existing = self.find(id).await?;
        if existing.user_id != user.id {
            warn!("User {} tried to edit resource {} they do not own", user.id, id);
            return Err(GatewayError::denied("Only the owner can edit this resource"));
        }

        let patch = trimmed(update)?;
        let filter = Filter::new()
            .eq("id", id.to_string())
            .eq("user_id", user.id.to_string());
        let rows = self.gateway.update(Table::Resources, patch, &filter).await?;
        if rows.is_empty() {
            return Err(GatewayError::not_found("resource", id));
        }
        let resource: Resource = single_row("resource", rows)?;
        info!("Resource {} edited by {}", id, user.id);

        invalidate_families(
            &self.cache,
            &[keys::RESOURCES, keys::USER_RESOURCES, keys::ADMIN_RESOURCES],
        )
        .await;
        Ok(resource)
    }

    /// Moderate a pending resource
    ///
    /// Only `pending` resources move, and only to `approved` or `rejected`.
    /// The write is conditional on the row still being pending, so two
    /// moderators racing on the same resource cannot both succeed.
    pub async fn update_status(&self, id: Uuid, status: ResourceStatus) -> GatewayResult<Resource> {
        let admin = self.session.require_admin().await?;

        let existing = self.find(id).await?;
        if !existing.status.can_transition_to(status) {
            return Err(GatewayError::Conflict(format!(
                "Resource {} cannot move from {} to {}",
                id, existing.status, status
            )));
        }

        let filter = Filter::new()
            .eq("id", id.to_string())
            .eq("status", ResourceStatus::Pending.as_str());
        let rows = self
            .gateway
            .update(Table::Resources, json!({ "status": status }), &filter)
            .await?;
        if rows.is_empty() {
            return Err(GatewayError::Conflict(format!(
                "Resource {} is no longer pending",
                id
            )));
        }
        let resource: Resource = single_row("resource", rows)?;
        info!("Resource {} {} by {}", id, status, admin.id);

        invalidate_families(
            &self.cache,
            &[
                keys::ADMIN_RESOURCES,
                keys::ADMIN_STATS,
                keys::RESOURCES,
                keys::USER_RESOURCES,
            ],
        )
        .await;
        Ok(resource)
    }

    /// Delete one of the current user's resources
    pub async fn delete(&self, id: Uuid) -> GatewayResult<()> {
        let user = self.session.require_user().await?;

        let existing = self.find(id).await?;
        if existing.user_id != user.id {
            warn!("User {} tried to delete resource {} they do not own", user.id, id);
            return Err(GatewayError::denied("Only the owner can delete this resource"));
        }

        let filter = Filter::new()
            .eq("id", id.to_string())
            .eq("user_id", user.id.to_string());
        let rows = self.gateway.delete(Table::Resources, &filter).await?;
        if rows.is_empty() {
            return Err(GatewayError::not_found("resource", id));
        }
        info!("Resource {} deleted by {}", id, user.id);

        invalidate_families(
            &self.cache,
            &[
                keys::RESOURCES,
                keys::USER_RESOURCES,
                keys::ADMIN_RESOURCES,
                keys::ADMIN_STATS,
                keys::REVIEWS,
            ],
        )
        .await;
        Ok(())
    }
}

fn trimmed(update: &ResourceUpdate) -> GatewayResult<Value> {
    let update = ResourceUpdate {
        title: update.title.as_deref().map(|value| value.trim().to_string()),
        description: update
            .description
            .as_deref()
            .map(|value| value.trim().to_string()),
        url: update.url.as_deref().map(|value| value.trim().to_string()),
        category: update.category,
    };
    serde_json::to_value(update)
        .map_err(|e| GatewayError::Unknown(format!("Failed to encode update: {}", e)))
}
