//! Auth session provider
//!
//! Wraps the gateway's authentication primitives and exposes the current
//! user, their role and sign-in/up/out to the rest of the application.

pub mod models;
pub mod session;
pub mod validation;

pub use models::{CurrentUser, LoginCredentials, Role, SessionState, SignUpRequest};
pub use session::{ListenerGuard, SessionProvider};
