use anyhow::{Context, Result};
use ridetrack::cache_bootstrap::bootstrap_caches;
use ridetrack::db;
use ridetrack::ingest_config::IngestConfig;
use ridetrack::location_cache::LocationCaches;
use ridetrack::locations_repo::PgLocationStore;
use tracing::info;

/// Rebuild the caches from PostgreSQL once and report what was loaded.
/// Useful as a startup check against a live database.
pub async fn handle_bootstrap(config: IngestConfig) -> Result<()> {
    let database_url = config.require_database_url()?.to_string();
    let pool_size = config.database_pool_size;
    let capacities = config.caches;

    let summary = tokio::task::spawn_blocking(move || {
        let pool = db::build_pool(&database_url, pool_size)?;
        let store = PgLocationStore::new(pool);
        let caches = LocationCaches::new(capacities);
        bootstrap_caches(&store, &caches)
    })
    .await
    .context("Bootstrap task panicked")??;

    info!(
        "Bootstrap check passed: {} positions, {} distances, {} vehicles with active rides",
        summary.positions, summary.distances, summary.active_rides
    );
    Ok(())
}
