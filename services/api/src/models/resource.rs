//! Resource models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::review::Review;

/// Kind of a shared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    AiTools,
    Video,
    Audio,
    Article,
    WebLink,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::AiTools,
        Category::Video,
        Category::Audio,
        Category::Article,
        Category::WebLink,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::AiTools => "ai_tools",
            Category::Video => "video",
            Category::Audio => "audio",
            Category::Article => "article",
            Category::WebLink => "web_link",
            Category::Other => "other",
        }
    }

    /// Human readable name
    pub fn label(&self) -> &'static str {
        match self {
            Category::AiTools => "AI Tools",
            Category::Video => "Video",
            Category::Audio => "Audio",
            Category::Article => "Article",
            Category::WebLink => "Web Link",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or_else(|| format!("Unknown category '{}'", value))
    }
}

/// Moderation state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Approved,
    Rejected,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Approved => "approved",
            ResourceStatus::Rejected => "rejected",
        }
    }

    /// Only pending resources are moderated, and only into a final state
    pub fn can_transition_to(&self, next: ResourceStatus) -> bool {
        matches!(
            (self, next),
            (
                ResourceStatus::Pending,
                ResourceStatus::Approved | ResourceStatus::Rejected
            )
        )
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub url: String,
    pub category: Category,
    pub status: ResourceStatus,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Submission payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResource {
    pub title: String,
    pub description: String,
    pub url: String,
    pub category: Category,
}

/// Owner edit payload; status is not editable here
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl ResourceUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.url.is_none()
            && self.category.is_none()
    }
}

/// Catalogue filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceFilter {
    /// Case-insensitive substring of the title
    pub search: Option<String>,
    pub category: Option<Category>,
}

impl ResourceFilter {
    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Search text worth sending, if any
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

/// A resource with its reviews
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceWithReviews {
    #[serde(flatten)]
    pub resource: Resource,
    pub reviews: Vec<Review>,
    /// Absent when there are no reviews
    pub average_rating: Option<f64>,
}

/// A resource with its owner's display name, for moderation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceWithOwner {
    #[serde(flatten)]
    pub resource: Resource,
    pub owner_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_names() {
        assert_eq!("web_link".parse::<Category>(), Ok(Category::WebLink));
        assert!("podcast".parse::<Category>().is_err());
        assert_eq!(Category::AiTools.label(), "AI Tools");
        assert_eq!(
            serde_json::to_value(Category::AiTools).unwrap(),
            serde_json::json!("ai_tools")
        );
    }

    #[test]
    fn test_status_transitions() {
        use ResourceStatus::*;

        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Pending));
    }

    #[test]
    fn test_resource_filter_ignores_blank_search() {
        assert_eq!(ResourceFilter::default().search("   ").search_term(), None);
        assert_eq!(ResourceFilter::default().search(" ai ").search_term(), Some("ai"));
    }
}
