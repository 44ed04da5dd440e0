use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::location_cache::LocationCaches;
use crate::locations::DistanceAggregate;
use crate::store::LocationStore;

/// How many entries each cache was seeded with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapSummary {
    pub positions: usize,
    pub distances: usize,
    pub active_rides: usize,
}

/// Rebuild every cache from the system of record.
///
/// Must finish before the first job is dequeued. Running it again replaces
/// the cache contents with the same values. When history holds more vehicles
/// than a cache can hold, the LRU keeps whichever were inserted last.
pub fn bootstrap_caches<S: LocationStore>(
    store: &S,
    caches: &LocationCaches,
) -> Result<BootstrapSummary> {
    let start = Instant::now();
    caches.clear();

    let latest = store
        .latest_locations()
        .context("Failed to load latest vehicle locations")?;
    let positions = latest.len();
    for location in latest {
        caches
            .positions()
            .set(location.vehicle_id.clone(), location);
    }

    let totals = store
        .distance_totals()
        .context("Failed to compute vehicle distance totals")?;
    let distances = totals.len();
    for total in totals {
        let vehicle_id = total.vehicle_id.clone();
        caches
            .distances()
            .set(vehicle_id, DistanceAggregate::from(total));
    }

    let counts = store
        .active_ride_counts()
        .context("Failed to count active rides")?;
    let active_rides = counts.len();
    for count in counts {
        caches
            .active_ride_counts()
            .set(count.vehicle_id, count.active_rides);
    }

    let summary = BootstrapSummary {
        positions,
        distances,
        active_rides,
    };
    info!(
        "Caches bootstrapped in {:.2}s: {} positions, {} distances, {} vehicles with active rides",
        start.elapsed().as_secs_f64(),
        summary.positions,
        summary.distances,
        summary.active_rides
    );
    Ok(summary)
}
