use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grid coordinate reported by a vehicle.
///
/// Coordinates are integer grid units so that pickup/destination matching is
/// an exact comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: i32,
    pub longitude: i32,
}

impl Coordinate {
    pub fn new(latitude: i32, longitude: i32) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Manhattan distance: |Δlatitude| + |Δlongitude|
    pub fn manhattan_distance(&self, other: &Coordinate) -> i64 {
        (i64::from(self.latitude) - i64::from(other.latitude)).abs()
            + (i64::from(self.longitude) - i64::from(other.longitude)).abs()
    }
}

/// A persisted position report. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::vehicle_locations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VehicleLocation {
    pub id: Uuid,
    pub vehicle_id: String,
    pub latitude: i32,
    pub longitude: i32,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl VehicleLocation {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// True when `self` comes after `other` in history order (recorded_at, then id)
    pub fn is_after(&self, other: &VehicleLocation) -> bool {
        (self.recorded_at, self.id) > (other.recorded_at, other.id)
    }
}

/// Insert model for a new position report
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::vehicle_locations)]
pub struct NewVehicleLocation {
    pub id: Uuid,
    pub vehicle_id: String,
    pub latitude: i32,
    pub longitude: i32,
    pub recorded_at: DateTime<Utc>,
}

impl NewVehicleLocation {
    pub fn new(vehicle_id: &str, coordinate: Coordinate, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            vehicle_id: vehicle_id.to_string(),
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            recorded_at,
        }
    }
}

/// Cumulative Manhattan distance travelled by a vehicle.
///
/// `updated_at` is the `recorded_at` of the last position folded into
/// `total_distance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceAggregate {
    pub total_distance: i64,
    pub updated_at: DateTime<Utc>,
}

impl DistanceAggregate {
    /// Aggregate for a vehicle whose history is a single position
    pub fn first(location: &VehicleLocation) -> Self {
        Self {
            total_distance: 0,
            updated_at: location.recorded_at,
        }
    }

    /// Fold one more hop from `prior` to `next` into the total
    pub fn advance(&self, prior: &VehicleLocation, next: &VehicleLocation) -> Self {
        Self {
            total_distance: self.total_distance
                + prior.coordinate().manhattan_distance(&next.coordinate()),
            updated_at: next.recorded_at,
        }
    }
}

/// Per-vehicle result of the windowed history aggregation
#[derive(Debug, Clone, PartialEq, Eq, QueryableByName, Serialize, Deserialize)]
pub struct DistanceTotal {
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub vehicle_id: String,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub total_distance: i64,
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub updated_at: DateTime<Utc>,
}

impl From<DistanceTotal> for DistanceAggregate {
    fn from(total: DistanceTotal) -> Self {
        Self {
            total_distance: total.total_distance,
            updated_at: total.updated_at,
        }
    }
}

/// Sum of consecutive Manhattan distances over a history already sorted by
/// (recorded_at, id). Returns `None` for an empty history.
pub fn total_distance(history: &[VehicleLocation]) -> Option<DistanceAggregate> {
    let (first, rest) = history.split_first()?;
    let mut aggregate = DistanceAggregate::first(first);
    let mut prior = first;
    for location in rest {
        aggregate = aggregate.advance(prior, location);
        prior = location;
    }
    Some(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn location(lat: i32, lon: i32, second: u32) -> VehicleLocation {
        let recorded_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, second).unwrap();
        VehicleLocation {
            id: Uuid::now_v7(),
            vehicle_id: "v1".to_string(),
            latitude: lat,
            longitude: lon,
            recorded_at,
            created_at: recorded_at,
        }
    }

    #[test]
    fn test_manhattan_distance() {
        let a = Coordinate::new(0, 0);
        let b = Coordinate::new(3, -4);
        assert_eq!(a.manhattan_distance(&b), 7);
        assert_eq!(b.manhattan_distance(&a), 7);
        assert_eq!(a.manhattan_distance(&a), 0);
    }

    #[test]
    fn test_manhattan_distance_does_not_overflow() {
        let a = Coordinate::new(i32::MIN, i32::MIN);
        let b = Coordinate::new(i32::MAX, i32::MAX);
        assert_eq!(a.manhattan_distance(&b), 2 * (u32::MAX as i64));
    }

    #[test]
    fn test_total_distance_of_history() {
        let history = vec![location(0, 0, 0), location(3, 4, 1), location(3, 4, 2)];
        let total = total_distance(&history).unwrap();
        assert_eq!(total.total_distance, 7);
        assert_eq!(total.updated_at, history[2].recorded_at);
    }

    #[test]
    fn test_total_distance_single_and_empty() {
        assert!(total_distance(&[]).is_none());
        let only = location(5, 5, 0);
        let total = total_distance(std::slice::from_ref(&only)).unwrap();
        assert_eq!(total.total_distance, 0);
        assert_eq!(total.updated_at, only.recorded_at);
    }

    #[test]
    fn test_is_after_uses_recorded_at_then_id() {
        let earlier = location(0, 0, 0);
        let later = location(0, 0, 1);
        assert!(later.is_after(&earlier));
        assert!(!earlier.is_after(&later));

        let mut same_time = earlier.clone();
        same_time.id = Uuid::now_v7();
        assert!(same_time.is_after(&earlier));
    }
}
