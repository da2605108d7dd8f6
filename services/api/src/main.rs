use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use api::AppState;
use api::models::ResourceFilter;
use common::GatewayConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting ResourceHub client");

    let config = GatewayConfig::from_env()?;
    let state = AppState::bootstrap(&config).await?;
    state.session.start().await?;

    match state.session.current_user().await {
        Some(user) => info!("Signed in as {} ({})", user.id, user.role),
        None => info!("No stored session, browsing anonymously"),
    }

    match state.resources.list_approved(&ResourceFilter::default()).await {
        Ok(resources) => {
            info!("{} approved resources", resources.len());
            for resource in resources {
                info!(
                    "[{}] {} - {}",
                    resource.category.label(),
                    resource.title,
                    resource.url
                );
            }
        }
        Err(e) => warn!("Failed to load the catalogue: {}", e),
    }

    state.session.shutdown();
    Ok(())
}
