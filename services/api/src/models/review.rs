//! Review models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::validation;

/// Review row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub user_id: Uuid,
    #[serde(deserialize_with = "rating")]
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Stored ratings outside 1..=5 are rejected rather than averaged
fn rating<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let rating = u8::deserialize(deserializer)?;
    validation::validate_rating(rating).map_err(serde::de::Error::custom)?;
    Ok(rating)
}

/// Review submission payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub resource_id: Uuid,
    pub rating: u8,
    pub comment: String,
}

/// Reviews of one resource with their average
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSummary {
    pub reviews: Vec<Review>,
    pub average_rating: Option<f64>,
}

impl ReviewSummary {
    pub fn new(reviews: Vec<Review>) -> Self {
        Self {
            average_rating: average_rating(&reviews),
            reviews,
        }
    }
}

/// Mean rating rounded to one decimal place, `None` without reviews
pub fn average_rating(reviews: &[Review]) -> Option<f64> {
    if reviews.is_empty() {
        return None;
    }
    let total: u32 = reviews.iter().map(|review| u32::from(review.rating)).sum();
    let mean = f64::from(total) / reviews.len() as f64;
    Some((mean * 10.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reviews(ratings: &[u8]) -> Vec<Review> {
        ratings
            .iter()
            .map(|&rating| Review {
                id: Uuid::new_v4(),
                resource_id: Uuid::nil(),
                user_id: Uuid::nil(),
                rating,
                comment: "Solid and well documented".to_string(),
                created_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_average_rating() {
        assert_eq!(average_rating(&reviews(&[5, 4, 3])), Some(4.0));
        assert_eq!(average_rating(&reviews(&[4, 5])), Some(4.5));
        assert_eq!(average_rating(&reviews(&[5, 4, 4])), Some(4.3));
        assert_eq!(average_rating(&reviews(&[1])), Some(1.0));
        assert_eq!(average_rating(&[]), None);
    }

    #[test]
    fn test_stored_rating_out_of_range_is_rejected() {
        let row = |rating: u64| {
            serde_json::json!({
                "id": Uuid::new_v4(),
                "resource_id": Uuid::nil(),
                "user_id": Uuid::nil(),
                "rating": rating,
                "comment": "Solid and well documented",
                "created_at": "2024-05-01T10:00:00Z",
            })
        };

        let review: Review = crate::models::parse_row("review", row(4)).unwrap();
        assert_eq!(review.rating, 4);
        for rating in [0, 9, 300] {
            let err = crate::models::parse_row::<Review>("review", row(rating)).unwrap_err();
            assert_eq!(err.field_errors()[0].field, "review");
        }
    }
}
