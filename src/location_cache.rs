use std::num::NonZeroUsize;

use crate::bounded_cache::BoundedCache;
use crate::locations::{DistanceAggregate, VehicleLocation};

/// Default capacity of each per-vehicle cache
pub const DEFAULT_CACHE_CAPACITY: usize = 1_000;

/// Capacities for the three per-vehicle caches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCapacities {
    pub positions: NonZeroUsize,
    pub distances: NonZeroUsize,
    pub active_rides: NonZeroUsize,
}

impl Default for CacheCapacities {
    fn default() -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            positions: capacity,
            distances: capacity,
            active_rides: capacity,
        }
    }
}

/// In-process accelerators derived from the persisted location and ride
/// history. Built once at startup and shared with the worker pool and any
/// reporting readers through an `Arc`.
pub struct LocationCaches {
    positions: BoundedCache<String, VehicleLocation>,
    distances: BoundedCache<String, DistanceAggregate>,
    active_rides: BoundedCache<String, i64>,
}

impl LocationCaches {
    pub fn new(capacities: CacheCapacities) -> Self {
        Self {
            positions: BoundedCache::new("latest_position", capacities.positions),
            distances: BoundedCache::new("total_distance", capacities.distances),
            active_rides: BoundedCache::new("active_rides", capacities.active_rides),
        }
    }

    pub fn positions(&self) -> &BoundedCache<String, VehicleLocation> {
        &self.positions
    }

    pub fn distances(&self) -> &BoundedCache<String, DistanceAggregate> {
        &self.distances
    }

    pub fn active_ride_counts(&self) -> &BoundedCache<String, i64> {
        &self.active_rides
    }

    /// Most recent committed position for a vehicle, if cached
    pub fn latest_position(&self, vehicle_id: &str) -> Option<VehicleLocation> {
        self.positions.get(&vehicle_id.to_string())
    }

    /// Cumulative distance for a vehicle, if cached
    pub fn total_distance(&self, vehicle_id: &str) -> Option<DistanceAggregate> {
        self.distances.get(&vehicle_id.to_string())
    }

    /// Number of non-terminal rides for a vehicle, if cached
    pub fn active_rides(&self, vehicle_id: &str) -> Option<i64> {
        self.active_rides.get(&vehicle_id.to_string())
    }

    /// Record committed state for a vehicle. Only call after the transaction
    /// that produced these values has committed.
    ///
    /// `seen_distance` is the distance entry the job read before its
    /// transaction. If another job has replaced it since, the two jobs raced
    /// and neither total can be trusted, so the entry is dropped and the next
    /// report recomputes it from history. The position entry only moves
    /// forward in (recorded_at, id) order.
    pub fn record_committed(
        &self,
        vehicle_id: &str,
        latest: VehicleLocation,
        distance: DistanceAggregate,
        seen_distance: Option<&DistanceAggregate>,
    ) {
        self.positions.update(vehicle_id.to_string(), |current| match current {
            Some(current) if !latest.is_after(current) => None,
            _ => Some(latest),
        });
        if !self
            .distances
            .compare_and_set(vehicle_id.to_string(), seen_distance, distance)
        {
            metrics::counter!("cache.distance.invalidated").increment(1);
        }
    }

    /// A ride was assigned to `vehicle_id`. Unknown vehicles start at one.
    ///
    /// Called by `LocationProcessor::create_ride`; rides written straight to
    /// the store are only picked up by the next bootstrap.
    pub fn ride_started(&self, vehicle_id: &str) {
        self.active_rides.update(vehicle_id.to_string(), |count| {
            Some(count.copied().unwrap_or(0) + 1)
        });
    }

    /// A ride of `vehicle_id` reached a terminal status. A vehicle that is not
    /// cached stays uncached: its count is unknown, not zero.
    pub fn ride_finished(&self, vehicle_id: &str) {
        self.active_rides
            .update(vehicle_id.to_string(), |count| count.map(|c| (c - 1).max(0)));
    }

    pub fn clear(&self) {
        self.positions.clear();
        self.distances.clear();
        self.active_rides.clear();
    }
}

impl Default for LocationCaches {
    fn default() -> Self {
        Self::new(CacheCapacities::default())
    }
}
