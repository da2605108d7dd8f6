//! Review repository

use std::sync::Arc;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use auth::SessionProvider;
use common::{GatewayResult, QueryCache};
use gateway::{Filter, Gateway, Select, Table};

use crate::keys;
use crate::models::{NewReview, Review, ReviewSummary, parse_rows, single_row};
use crate::repositories::invalidate_families;
use crate::validation;

/// Review repository
#[derive(Clone)]
pub struct ReviewRepository {
    gateway: Arc<dyn Gateway>,
    cache: QueryCache,
    session: SessionProvider,
}

impl ReviewRepository {
    /// Create a new review repository
    pub fn new(gateway: Arc<dyn Gateway>, cache: QueryCache, session: SessionProvider) -> Self {
        Self {
            gateway,
            cache,
            session,
        }
    }

    /// Reviews of a resource, newest first, with their average rating
    pub async fn list_for_resource(&self, resource_id: Uuid) -> GatewayResult<ReviewSummary> {
        let select = Select::from(Table::Reviews)
            .filter(Filter::new().eq("resource_id", resource_id.to_string()))
            .newest_first();

        let gateway = self.gateway.clone();
        self.cache
            .query(keys::reviews(resource_id), move || async move {
                let reviews: Vec<Review> =
                    parse_rows("review", gateway.select(&select).await?.rows)?;
                Ok(ReviewSummary::new(reviews))
            })
            .await
    }

    /// Post a review as the current user
    ///
    /// A user may review the same resource more than once.
    pub async fn create(&self, new: &NewReview) -> GatewayResult<Review> {
        validation::validate_new_review(new)?;
        let user = self.session.require_user().await?;

        let row = json!({
            "resource_id": new.resource_id.to_string(),
            "user_id": user.id.to_string(),
            "rating": new.rating,
            "comment": new.comment.trim(),
        });
        let review: Review =
            single_row("review", self.gateway.insert(Table::Reviews, vec![row]).await?)?;
        info!(
            "Review {} of resource {} by {}",
            review.id, review.resource_id, user.id
        );

        invalidate_families(&self.cache, &[keys::REVIEWS, keys::USER_RESOURCES]).await;
        Ok(review)
    }
}
