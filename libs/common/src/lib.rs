//! Common library for the ResourceHub client
//!
//! This crate provides shared functionality used across the gateway, the
//! session provider and the data accessors: the error taxonomy, configuration
//! loading and the keyed query cache.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{CachePolicy, QueryCache, QueryKey, QuerySnapshot, QueryStatus};
pub use config::{ConfigError, GatewayConfig};
pub use error::{FieldError, GatewayError, GatewayResult};

/// Example usage of the query cache
///
/// ```rust,no_run
/// use common::{GatewayConfig, QueryCache, QueryKey};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = GatewayConfig::from_env()?;
///     let cache = QueryCache::with_policy(config.cache_policy());
///     let count: u64 = cache
///         .query(QueryKey::new("admin-stats"), || async { Ok(42) })
///         .await?;
///     println!("Cached count: {}", count);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
