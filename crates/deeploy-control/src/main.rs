//! Deeploy control service binary.

use tracing::info;
use tracing_subscriber::EnvFilter;

use deeploy_control::{DeeployConfig, DeeployService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("deeploy_control=info".parse()?),
        )
        .init();

    info!("deeploy control service starting");

    let config = DeeployConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        DeeployConfig::default()
    });

    info!(
        listen_addr = %config.server.listen_addr,
        ledger = config.ledger.url.as_deref().unwrap_or("memory"),
        fleet = config.fleet.url.as_deref().unwrap_or("memory"),
        strategy = %config.deployment.update_strategy,
        "configuration loaded"
    );

    DeeployService::new(config).run().await?;

    Ok(())
}
