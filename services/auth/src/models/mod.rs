//! Session provider models

pub mod role;
pub mod session;
pub mod user;

// Re-export for convenience
pub use role::Role;
pub use session::SessionState;
pub use user::{CurrentUser, LoginCredentials, SignUpRequest};
