//! Data accessors
//!
//! Each repository composes gateway calls into the shapes the application
//! needs. Reads go through the shared [`QueryCache`] under a key from
//! [`crate::keys`]; writes go straight to the gateway and then invalidate the
//! key families whose results they change.

use common::QueryCache;
use tracing::debug;

use crate::keys;

pub mod profile;
pub mod resource;
pub mod review;
pub mod stats;
pub mod user;

pub use profile::ProfileRepository;
pub use resource::ResourceRepository;
pub use review::ReviewRepository;
pub use stats::StatsRepository;
pub use user::UserRepository;

/// Mark every cached query of the given families stale
pub(crate) async fn invalidate_families(cache: &QueryCache, families: &[&str]) {
    for family in families {
        let marked = cache.invalidate(&keys::family(family)).await;
        debug!("Invalidated {} {} queries", marked, family);
    }
}
