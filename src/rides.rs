use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::locations::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::RideStatus")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    #[db_enum(rename = "MATCHING")]
    Matching,
    #[db_enum(rename = "ENROUTE")]
    Enroute,
    #[db_enum(rename = "PICKUP")]
    Pickup,
    #[db_enum(rename = "CARRYING")]
    Carrying,
    #[db_enum(rename = "ARRIVED")]
    Arrived,
    #[db_enum(rename = "COMPLETED")]
    Completed,
    #[db_enum(rename = "CANCELED")]
    Canceled,
}

impl RideStatus {
    /// No lifecycle events are appended after a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Matching => "MATCHING",
            RideStatus::Enroute => "ENROUTE",
            RideStatus::Pickup => "PICKUP",
            RideStatus::Carrying => "CARRYING",
            RideStatus::Arrived => "ARRIVED",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ride. Pickup and destination are fixed when the ride is created.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::rides)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Ride {
    pub id: Uuid,
    pub vehicle_id: Option<String>,
    pub pickup_latitude: i32,
    pub pickup_longitude: i32,
    pub destination_latitude: i32,
    pub destination_longitude: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn pickup(&self) -> Coordinate {
        Coordinate::new(self.pickup_latitude, self.pickup_longitude)
    }

    pub fn destination(&self) -> Coordinate {
        Coordinate::new(self.destination_latitude, self.destination_longitude)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::rides)]
pub struct NewRide {
    pub id: Uuid,
    pub vehicle_id: Option<String>,
    pub pickup_latitude: i32,
    pub pickup_longitude: i32,
    pub destination_latitude: i32,
    pub destination_longitude: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewRide {
    pub fn new(vehicle_id: Option<&str>, pickup: Coordinate, destination: Coordinate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            vehicle_id: vehicle_id.map(str::to_string),
            pickup_latitude: pickup.latitude,
            pickup_longitude: pickup.longitude,
            destination_latitude: destination.latitude,
            destination_longitude: destination.longitude,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One entry of the append-only ride status log
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::ride_statuses)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RideStatusEvent {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub status: RideStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert model for a status event. `created_at` is left to the store so
/// every writer of the log shares one clock.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::ride_statuses)]
pub struct NewRideStatusEvent {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub status: RideStatus,
}

impl NewRideStatusEvent {
    pub fn new(ride_id: Uuid, status: RideStatus) -> Self {
        Self {
            id: Uuid::now_v7(),
            ride_id,
            status,
        }
    }
}

/// Current status of a ride: the event with the greatest `created_at`,
/// ties going to the later (time-ordered) id. `None` for an empty log.
pub fn current_status(events: &[RideStatusEvent]) -> Option<RideStatus> {
    events
        .iter()
        .max_by_key(|event| (event.created_at, event.id))
        .map(|event| event.status)
}

/// Lifecycle transition triggered by a vehicle reporting `at`.
///
/// Only ENROUTE -> PICKUP at the pickup point and CARRYING -> ARRIVED at the
/// destination are driven by position reports. Matching is exact.
pub fn next_status(ride: &Ride, current: RideStatus, at: Coordinate) -> Option<RideStatus> {
    if current.is_terminal() {
        return None;
    }
    if current == RideStatus::Enroute && at == ride.pickup() {
        Some(RideStatus::Pickup)
    } else if current == RideStatus::Carrying && at == ride.destination() {
        Some(RideStatus::Arrived)
    } else {
        None
    }
}
