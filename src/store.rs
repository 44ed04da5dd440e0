//! System-of-record interface for the location pipeline.
//!
//! The worker protocol and the cache bootstrapper only see these traits.
//! `PgLocationStore` backs them with PostgreSQL; `MemoryStore` is an
//! in-process implementation with the same semantics.

use anyhow::Result;
use uuid::Uuid;

use crate::locations::{DistanceTotal, NewVehicleLocation, VehicleLocation};
use crate::rides::{NewRide, NewRideStatusEvent, Ride, RideStatusEvent};

/// Number of non-terminal rides assigned to a vehicle
#[derive(Debug, Clone, PartialEq, Eq, diesel::QueryableByName)]
pub struct ActiveRideCount {
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub vehicle_id: String,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub active_rides: i64,
}

/// Operations available inside one atomic unit of work
pub trait LocationTransaction {
    /// Latest persisted position for a vehicle by (recorded_at, id)
    fn latest_location(&mut self, vehicle_id: &str) -> Result<Option<VehicleLocation>>;

    fn insert_location(&mut self, location: &NewVehicleLocation) -> Result<Uuid>;

    fn location_by_id(&mut self, id: Uuid) -> Result<Option<VehicleLocation>>;

    /// Recompute one vehicle's cumulative distance from its full history
    fn distance_total(&mut self, vehicle_id: &str) -> Result<Option<DistanceTotal>>;

    /// Ride most recently updated for a vehicle
    fn latest_ride_for_vehicle(&mut self, vehicle_id: &str) -> Result<Option<Ride>>;

    fn status_events(&mut self, ride_id: Uuid) -> Result<Vec<RideStatusEvent>>;

    fn append_status(&mut self, event: &NewRideStatusEvent) -> Result<()>;
}

/// Transactional access to persisted locations, rides and ride statuses.
///
/// `transaction` commits when the closure returns `Ok` and rolls back every
/// write made through the transaction handle when it returns `Err` or when
/// the commit itself fails.
pub trait LocationStore: Clone + Send + Sync + 'static {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LocationTransaction) -> Result<T>;

    /// Latest position of every vehicle with history
    fn latest_locations(&self) -> Result<Vec<VehicleLocation>>;

    /// Windowed pairwise distance aggregation for every vehicle with history
    fn distance_totals(&self) -> Result<Vec<DistanceTotal>>;

    /// Vehicles with at least one ride whose current status is not terminal
    fn active_ride_counts(&self) -> Result<Vec<ActiveRideCount>>;

    /// Persist a new ride (the API layer's concern; used for seeding and tests)
    fn create_ride(&self, ride: &NewRide) -> Result<Ride>;

    /// Append a status event outside of location processing
    fn append_ride_status(&self, event: &NewRideStatusEvent) -> Result<()> {
        self.transaction(|tx| tx.append_status(event))
    }
}
