use anyhow::{Context, Result};
use coordinator::{standard_fleet, Config, Database, Fleet, FleetOptions};
use tracing::info;

use crate::shell::registry_from_env;

/// Host the fleet until Ctrl-C.
pub async fn run(config: &Config, db: &Database) -> Result<()> {
    let specs = standard_fleet();
    let executors = registry_from_env(&specs, |key| std::env::var(key).ok());

    let options = FleetOptions::builder()
        .store(db.kv())
        .features(config.features.clone())
        .wait_backoff(config.wait_backoff)
        .eviction_interval(config.eviction_interval)
        .build();

    let mut fleet = Fleet::build(specs, executors, options).context("Invalid worker table")?;
    fleet.start().await.context("Failed to start workers")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");

    fleet.shutdown().await.context("Failed to stop scheduler")?;
    Ok(())
}
