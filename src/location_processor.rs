use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::ingest_queue::LocationJob;
use crate::location_cache::LocationCaches;
use crate::locations::{DistanceAggregate, NewVehicleLocation, VehicleLocation};
use crate::rides::{NewRide, NewRideStatusEvent, Ride, RideStatus, current_status, next_status};
use crate::store::{LocationStore, LocationTransaction};

/// What a committed job changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationOutcome {
    /// The row persisted for this report
    pub location: VehicleLocation,
    /// Latest position of the vehicle after this report (differs from
    /// `location` only when the report arrived out of time order)
    pub latest: VehicleLocation,
    pub distance: DistanceAggregate,
    pub status_appended: Option<RideStatus>,
}

/// Runs the per-report update protocol: persist the position, advance the
/// ride lifecycle, and refresh the position and distance caches once the
/// transaction has committed.
#[derive(Clone)]
pub struct LocationProcessor<S> {
    store: S,
    caches: Arc<LocationCaches>,
}

impl<S: LocationStore> LocationProcessor<S> {
    pub fn new(store: S, caches: Arc<LocationCaches>) -> Self {
        Self { store, caches }
    }

    pub fn caches(&self) -> &Arc<LocationCaches> {
        &self.caches
    }

    /// Process one report. Blocking: call from a blocking-capable thread.
    ///
    /// On error nothing is persisted and the caches are left untouched.
    pub fn process(&self, job: &LocationJob) -> Result<LocationOutcome> {
        let start = Instant::now();
        let vehicle_id = job.vehicle_id.as_str();

        let cached_prior = self.caches.latest_position(vehicle_id);
        let cached_distance = self.caches.total_distance(vehicle_id);

        let outcome = self
            .store
            .transaction(|tx| {
                let prior = match cached_prior {
                    Some(prior) => Some(prior),
                    None => tx.latest_location(vehicle_id)?,
                };

                let new_location =
                    NewVehicleLocation::new(vehicle_id, job.coordinate, job.recorded_at);
                let id = tx.insert_location(&new_location)?;
                let location = tx
                    .location_by_id(id)?
                    .with_context(|| format!("inserted location {} not found", id))?;

                let (latest, distance) =
                    advance_aggregates(tx, vehicle_id, prior, cached_distance, &location)?;
                let status_appended = advance_ride(tx, vehicle_id, &location)?;

                Ok(LocationOutcome {
                    location,
                    latest,
                    distance,
                    status_appended,
                })
            })
            .with_context(|| format!("location job for vehicle {} aborted", vehicle_id))?;

        // Committed: only now may the caches observe the new state
        self.caches.record_committed(
            vehicle_id,
            outcome.latest.clone(),
            outcome.distance,
            cached_distance.as_ref(),
        );

        if let Some(status) = outcome.status_appended {
            metrics::counter!("ingest.ride_status.appended", "status" => status.as_str())
                .increment(1);
            info!(
                "Vehicle {} reached {:?}: ride status advanced to {}",
                vehicle_id, job.coordinate, status
            );
        }
        metrics::histogram!("ingest.job.duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        Ok(outcome)
    }

    /// Persist a ride and count it as active for its vehicle once committed
    pub fn create_ride(&self, ride: &NewRide) -> Result<Ride> {
        let ride = self.store.create_ride(ride)?;
        if let Some(vehicle_id) = &ride.vehicle_id {
            self.caches.ride_started(vehicle_id);
        }
        Ok(ride)
    }

    /// Append `status` to the log of `ride`. Moving an active ride to a
    /// terminal status releases it from its vehicle's active count.
    pub fn append_ride_status(&self, ride: &Ride, status: RideStatus) -> Result<()> {
        let was_active = self
            .store
            .transaction(|tx| {
                let events = tx.status_events(ride.id)?;
                let was_active = current_status(&events).is_none_or(|s| !s.is_terminal());
                tx.append_status(&NewRideStatusEvent::new(ride.id, status))?;
                Ok(was_active)
            })
            .with_context(|| format!("failed to append {} to ride {}", status, ride.id))?;

        if was_active
            && status.is_terminal()
            && let Some(vehicle_id) = &ride.vehicle_id
        {
            self.caches.ride_finished(vehicle_id);
        }
        Ok(())
    }
}

/// Work out the vehicle's latest position and cumulative distance after
/// `location` was inserted.
///
/// The cached aggregate is advanced by one hop only when it is known to
/// describe history up to `prior` and `location` extends that history.
/// Anything else (a missing aggregate, one that disagrees with `prior`, or a
/// report older than `prior`) is recomputed from the persisted history.
fn advance_aggregates(
    tx: &mut dyn LocationTransaction,
    vehicle_id: &str,
    prior: Option<VehicleLocation>,
    cached_distance: Option<DistanceAggregate>,
    location: &VehicleLocation,
) -> Result<(VehicleLocation, DistanceAggregate)> {
    let Some(prior) = prior else {
        // First report ever seen for this vehicle
        return Ok((location.clone(), DistanceAggregate::first(location)));
    };

    if !location.is_after(&prior) {
        debug!(
            "Out-of-order report for vehicle {} ({} before {})",
            vehicle_id, location.recorded_at, prior.recorded_at
        );
        let distance = recompute_distance(tx, vehicle_id, location)?;
        return Ok((prior, distance));
    }

    let distance = match cached_distance {
        Some(aggregate) if aggregate.updated_at == prior.recorded_at => {
            aggregate.advance(&prior, location)
        }
        _ => recompute_distance(tx, vehicle_id, location)?,
    };
    Ok((location.clone(), distance))
}

fn recompute_distance(
    tx: &mut dyn LocationTransaction,
    vehicle_id: &str,
    location: &VehicleLocation,
) -> Result<DistanceAggregate> {
    metrics::counter!("cache.distance.recomputed").increment(1);
    let total = tx.distance_total(vehicle_id)?;
    Ok(total
        .map(DistanceAggregate::from)
        .unwrap_or_else(|| DistanceAggregate::first(location)))
}

/// Append PICKUP or ARRIVED when the vehicle's latest ride expects it here
fn advance_ride(
    tx: &mut dyn LocationTransaction,
    vehicle_id: &str,
    location: &VehicleLocation,
) -> Result<Option<RideStatus>> {
    let Some(ride) = tx.latest_ride_for_vehicle(vehicle_id)? else {
        return Ok(None);
    };
    let events = tx.status_events(ride.id)?;
    let Some(current) = current_status(&events) else {
        debug!(
            "Ride {} of vehicle {} has no status events, skipping lifecycle check",
            ride.id, vehicle_id
        );
        return Ok(None);
    };

    let Some(next) = next_status(&ride, current, location.coordinate()) else {
        return Ok(None);
    };
    tx.append_status(&NewRideStatusEvent::new(ride.id, next))?;
    Ok(Some(next))
}
