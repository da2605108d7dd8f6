//! Custom error types for the common library
//!
//! This module defines the error taxonomy shared by the gateway, the session
//! provider, the query cache and the data accessors.

use std::fmt;

use thiserror::Error;

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the offending field
    pub field: String,
    /// Human readable reason
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Error type for every remote call and every accessor built on top of one
///
/// Errors are `Clone` because a single in-flight load may be shared by several
/// callers of the query cache.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The backend could not be reached or the transfer failed
    #[error("Network error: {0}")]
    Network(String),

    /// The call needs a signed-in user
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The caller is signed in but not allowed to do this
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// One or more fields were rejected
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    /// The addressed record does not exist
    #[error("Not found: {entity} '{id}'")]
    NotFound { entity: String, id: String },

    /// The write clashes with the current state of the record
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Anything the backend reported that does not fit the categories above
    #[error("Unknown error: {0}")]
    Unknown(String),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl GatewayError {
    /// Creates a NotFound error
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a Validation error for a single field
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// Creates an AuthorizationDenied error
    pub fn denied(message: impl Into<String>) -> Self {
        Self::AuthorizationDenied(message.into())
    }

    /// Maps an HTTP status returned by the backend to an error kind
    ///
    /// `message` is the backend's own explanation, kept as the cause.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => Self::invalid("request", message),
            401 => Self::AuthenticationRequired,
            403 => Self::AuthorizationDenied(message),
            404 => Self::NotFound {
                entity: "record".to_string(),
                id: message,
            },
            409 => Self::Conflict(message),
            _ => Self::Unknown(format!("HTTP {}: {}", status, message)),
        }
    }

    /// Field-level failures, if this is a validation error
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation(fields) => fields,
            _ => &[],
        }
    }

    /// True for denials that a signed-in user cannot fix by retrying
    pub fn is_access_error(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired | Self::AuthorizationDenied(_)
        )
    }
}

/// Type alias for Result with GatewayError
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_taxonomy() {
        assert_eq!(
            GatewayError::from_status(401, "jwt expired"),
            GatewayError::AuthenticationRequired
        );
        assert_eq!(
            GatewayError::from_status(403, "row-level security"),
            GatewayError::AuthorizationDenied("row-level security".to_string())
        );
        assert!(matches!(
            GatewayError::from_status(404, "x"),
            GatewayError::NotFound { .. }
        ));
        assert!(matches!(
            GatewayError::from_status(409, "duplicate"),
            GatewayError::Conflict(_)
        ));
        assert!(matches!(
            GatewayError::from_status(422, "bad"),
            GatewayError::Validation(_)
        ));
        assert!(matches!(
            GatewayError::from_status(503, "down"),
            GatewayError::Unknown(_)
        ));
    }

    #[test]
    fn test_validation_display_lists_fields() {
        let err = GatewayError::Validation(vec![
            FieldError::new("title", "too short"),
            FieldError::new("url", "invalid"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: title: too short; url: invalid"
        );
        assert_eq!(err.field_errors().len(), 2);
    }
}
