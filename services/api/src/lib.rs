//! ResourceHub data layer
//!
//! Data accessors for resources, reviews, profiles, users and moderation
//! stats, built on the gateway, the session provider and the query cache.

pub mod actions;
pub mod keys;
pub mod models;
pub mod repositories;
pub mod state;
pub mod validation;

pub use actions::{Actions, Notice, NoticeLevel};
pub use state::AppState;
