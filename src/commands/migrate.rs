use anyhow::{Context, Result};
use ridetrack::db;
use ridetrack::ingest_config::IngestConfig;
use tracing::info;

pub async fn handle_migrate(config: IngestConfig) -> Result<()> {
    let database_url = config.require_database_url()?.to_string();
    let pool_size = config.database_pool_size;

    tokio::task::spawn_blocking(move || {
        let pool = db::build_pool(&database_url, pool_size)?;
        db::run_migrations(&pool)
    })
    .await
    .context("Migration task panicked")??;

    info!("Migrations complete");
    Ok(())
}
