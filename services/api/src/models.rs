//! Typed rows and the shapes built from them

use serde::de::DeserializeOwned;
use serde_json::Value;

use common::{GatewayError, GatewayResult};

pub mod profile;
pub mod resource;
pub mod review;
pub mod stats;

pub use profile::{Profile, ProfileUpdate, UserWithProfile};
pub use resource::{
    Category, NewResource, Resource, ResourceFilter, ResourceStatus, ResourceUpdate,
    ResourceWithOwner, ResourceWithReviews,
};
pub use review::{NewReview, Review, ReviewSummary, average_rating};
pub use stats::AdminStats;

/// Parse a row into its typed model
///
/// A row that does not have the expected shape is a validation failure.
pub fn parse_row<T: DeserializeOwned>(entity: &str, row: Value) -> GatewayResult<T> {
    serde_json::from_value(row)
        .map_err(|e| GatewayError::invalid(entity, format!("unexpected row shape: {}", e)))
}

pub fn parse_rows<T: DeserializeOwned>(entity: &str, rows: Vec<Value>) -> GatewayResult<Vec<T>> {
    rows.into_iter().map(|row| parse_row(entity, row)).collect()
}

/// The single row a write returned
pub fn single_row<T: DeserializeOwned>(entity: &str, rows: Vec<Value>) -> GatewayResult<T> {
    match rows.into_iter().next() {
        Some(row) => parse_row(entity, row),
        None => Err(GatewayError::Unknown(format!(
            "the backend returned no {} row",
            entity
        ))),
    }
}
