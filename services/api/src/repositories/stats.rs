//! Stats repository

use std::sync::Arc;

use futures::try_join;

use auth::SessionProvider;
use common::{GatewayResult, QueryCache};
use gateway::{Filter, Gateway, Select, Table};

use crate::keys;
use crate::models::{AdminStats, ResourceStatus};

/// Stats repository
#[derive(Clone)]
pub struct StatsRepository {
    gateway: Arc<dyn Gateway>,
    cache: QueryCache,
    session: SessionProvider,
}

async fn count(gateway: &dyn Gateway, select: Select) -> GatewayResult<u64> {
    let selection = gateway.select(&select.count_only()).await?;
    Ok(selection.count.unwrap_or(0))
}

fn by_status(status: ResourceStatus) -> Select {
    Select::from(Table::Resources).filter(Filter::new().eq("status", status.as_str()))
}

impl StatsRepository {
    /// Create a new stats repository
    pub fn new(gateway: Arc<dyn Gateway>, cache: QueryCache, session: SessionProvider) -> Self {
        Self {
            gateway,
            cache,
            session,
        }
    }

    /// User and resource counts for the moderation dashboard
    ///
    /// The five counts are fetched concurrently; users are counted by their
    /// profile rows.
    pub async fn admin_stats(&self) -> GatewayResult<AdminStats> {
        self.session.require_admin().await?;

        let gateway = self.gateway.clone();
        self.cache
            .query(keys::admin_stats(), move || async move {
                let gateway = gateway.as_ref();
                let (users, total, pending, approved, rejected) = try_join!(
                    count(gateway, Select::from(Table::Profiles).columns("id")),
                    count(gateway, Select::from(Table::Resources).columns("id")),
                    count(gateway, by_status(ResourceStatus::Pending)),
                    count(gateway, by_status(ResourceStatus::Approved)),
                    count(gateway, by_status(ResourceStatus::Rejected)),
                )?;

                Ok(AdminStats {
                    users,
                    total,
                    pending,
                    approved,
                    rejected,
                })
            })
            .await
    }
}
