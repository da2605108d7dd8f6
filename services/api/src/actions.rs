//! User actions
//!
//! The entry points a UI calls for data-changing actions. Every action
//! returns a [`Notice`] instead of an error and publishes it to subscribers,
//! so failures end up in front of the user rather than aborting anything.

use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

use auth::Role;
use common::{GatewayError, GatewayResult};

use crate::models::{NewResource, NewReview, ProfileUpdate, ResourceStatus, ResourceUpdate};
use crate::state::AppState;

/// Severity of a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Transient message for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.level == NoticeLevel::Success
    }
}

/// Message shown for a failed action
fn describe(err: &GatewayError, fallback: &str) -> String {
    match err {
        GatewayError::Validation(fields) => fields
            .iter()
            .map(|field| field.message.clone())
            .collect::<Vec<_>>()
            .join(". "),
        GatewayError::AuthenticationRequired => "Please sign in to continue".to_string(),
        GatewayError::AuthorizationDenied(_) => {
            "You do not have permission to do that".to_string()
        }
        GatewayError::Network(_) => {
            "Could not reach the server. Please check your connection".to_string()
        }
        GatewayError::Conflict(message) => message.clone(),
        GatewayError::NotFound { entity, .. } => format!("That {} no longer exists", entity),
        GatewayError::Unknown(_) => fallback.to_string(),
    }
}

/// Data-changing user actions
#[derive(Clone)]
pub struct Actions {
    state: AppState,
    notices: broadcast::Sender<Notice>,
}

impl Actions {
    pub fn new(state: AppState) -> Self {
        let (notices, _) = broadcast::channel(32);
        Self { state, notices }
    }

    /// Receive every notice from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn settle<T>(&self, action: &str, result: GatewayResult<T>, success: &str, failure: &str) -> Notice {
        let notice = match result {
            Ok(_) => {
                info!("{} succeeded", action);
                Notice::success(success)
            }
            Err(e) => {
                error!("{} failed: {}", action, e);
                Notice::error(describe(&e, failure))
            }
        };
        let _ = self.notices.send(notice.clone());
        notice
    }

    pub async fn submit_resource(&self, new: &NewResource) -> Notice {
        let result = self.state.resources.create(new).await;
        self.settle(
            "Submit resource",
            result,
            "Resource submitted successfully!",
            "Failed to submit resource. Please try again.",
        )
    }

    pub async fn edit_resource(&self, id: Uuid, update: &ResourceUpdate) -> Notice {
        let result = self.state.resources.update(id, update).await;
        self.settle(
            "Edit resource",
            result,
            "Resource updated successfully",
            "Failed to update resource",
        )
    }

    pub async fn delete_resource(&self, id: Uuid) -> Notice {
        let result = self.state.resources.delete(id).await;
        self.settle(
            "Delete resource",
            result,
            "Resource deleted successfully",
            "Failed to delete resource",
        )
    }

    pub async fn moderate_resource(&self, id: Uuid, status: ResourceStatus) -> Notice {
        let result = self.state.resources.update_status(id, status).await;
        self.settle(
            "Moderate resource",
            result,
            &format!("Resource {} successfully", status),
            "Failed to update resource status",
        )
    }

    pub async fn submit_review(&self, new: &NewReview) -> Notice {
        let result = self.state.reviews.create(new).await;
        self.settle(
            "Submit review",
            result,
            "Review submitted successfully",
            "Failed to submit review",
        )
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Notice {
        let result = match self.state.session.require_user().await {
            Ok(user) => self.state.profiles.update(user.id, update).await,
            Err(e) => Err(e),
        };
        self.settle(
            "Update profile",
            result,
            "Profile updated successfully",
            "Failed to update profile",
        )
    }

    pub async fn upload_avatar(&self, bytes: Vec<u8>, file_name: &str) -> Notice {
        let result = self.state.profiles.upload_avatar(bytes, file_name).await;
        self.settle(
            "Upload avatar",
            result,
            "Profile picture updated successfully",
            "Error uploading image",
        )
    }

    pub async fn update_user_role(&self, user_id: Uuid, role: Role) -> Notice {
        let result = self
            .state
            .profiles
            .update(user_id, &ProfileUpdate::role(role))
            .await;
        self.settle(
            "Update user role",
            result,
            "User updated successfully",
            "Failed to update user",
        )
    }

    pub async fn sign_out(&self) -> Notice {
        let result = self.state.session.sign_out().await;
        self.state.cache.clear().await;
        self.settle(
            "Sign out",
            result,
            "Signed out successfully",
            "Failed to sign out",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FieldError;

    #[test]
    fn test_describe_errors() {
        let validation = GatewayError::Validation(vec![
            FieldError::new("rating", "Rating must be between 1 and 5"),
            FieldError::new("comment", "Comment must be at least 10 characters long"),
        ]);
        assert_eq!(
            describe(&validation, "x"),
            "Rating must be between 1 and 5. Comment must be at least 10 characters long"
        );
        assert_eq!(
            describe(&GatewayError::Unknown("boom".to_string()), "Failed to submit review"),
            "Failed to submit review"
        );
        assert_eq!(
            describe(&GatewayError::not_found("resource", "1"), "x"),
            "That resource no longer exists"
        );
    }
}
