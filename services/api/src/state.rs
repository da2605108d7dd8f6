//! Application state shared across the data accessors

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};
use uuid::Uuid;

use auth::{ListenerGuard, SessionProvider};
use common::{CachePolicy, GatewayConfig, GatewayResult, QueryCache};
use gateway::{Gateway, RestGateway};

use crate::repositories::{
    ProfileRepository, ResourceRepository, ReviewRepository, StatsRepository, UserRepository,
};

/// Application state shared across the data accessors
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn Gateway>,
    pub cache: QueryCache,
    pub session: SessionProvider,
    pub resources: ResourceRepository,
    pub reviews: ReviewRepository,
    pub profiles: ProfileRepository,
    pub users: UserRepository,
    pub stats: StatsRepository,
    _cache_reset: Arc<ListenerGuard>,
}

impl AppState {
    /// Wire the accessors around a gateway
    ///
    /// The cache is emptied whenever the signed-in user changes, so one
    /// user's results are never served to another.
    pub fn new(gateway: Arc<dyn Gateway>, policy: CachePolicy) -> Self {
        let cache = QueryCache::with_policy(policy);
        let session = SessionProvider::new(gateway.clone());

        let last_user: Mutex<Option<Uuid>> = Mutex::new(None);
        let reset_cache = cache.clone();
        let cache_reset = session.subscribe(move |state| {
            let user_id = state.user.as_ref().map(|user| user.id);
            let mut last_user = last_user.lock().unwrap_or_else(PoisonError::into_inner);
            if *last_user == user_id {
                return;
            }
            *last_user = user_id;

            debug!("Signed-in user changed, clearing the query cache");
            let cache = reset_cache.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { cache.clear().await });
            }
        });

        Self {
            resources: ResourceRepository::new(gateway.clone(), cache.clone(), session.clone()),
            reviews: ReviewRepository::new(gateway.clone(), cache.clone(), session.clone()),
            profiles: ProfileRepository::new(gateway.clone(), cache.clone(), session.clone()),
            users: UserRepository::new(gateway.clone(), cache.clone(), session.clone()),
            stats: StatsRepository::new(gateway.clone(), cache.clone(), session.clone()),
            gateway,
            cache,
            session,
            _cache_reset: Arc::new(cache_reset),
        }
    }

    /// Connect to the configured backend, restoring a persisted session
    pub async fn bootstrap(config: &GatewayConfig) -> GatewayResult<Self> {
        let gateway = RestGateway::connect(config).await?;
        info!("Connected to backend at {}", config.base_url());
        Ok(Self::new(Arc::new(gateway), config.cache_policy()))
    }
}
