use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use chrono::Utc;
use uuid::Uuid;

use crate::locations::{DistanceTotal, NewVehicleLocation, VehicleLocation, total_distance};
use crate::rides::{NewRide, NewRideStatusEvent, Ride, RideStatusEvent, current_status};
use crate::store::{ActiveRideCount, LocationStore, LocationTransaction};

#[derive(Debug, Default)]
struct Tables {
    locations: Vec<VehicleLocation>,
    location_ids: HashSet<Uuid>,
    rides: Vec<Ride>,
    ride_statuses: Vec<RideStatusEvent>,
}

/// Table lengths at transaction start. Transactions only append rows, so
/// rolling back is a truncation to these lengths.
#[derive(Debug, Clone, Copy)]
struct Savepoint {
    locations: usize,
    ride_statuses: usize,
}

impl Tables {
    fn savepoint(&self) -> Savepoint {
        Savepoint {
            locations: self.locations.len(),
            ride_statuses: self.ride_statuses.len(),
        }
    }

    fn rollback_to(&mut self, savepoint: Savepoint) {
        for row in self.locations.drain(savepoint.locations..) {
            self.location_ids.remove(&row.id);
        }
        self.ride_statuses.truncate(savepoint.ride_statuses);
    }

    fn push_location(&mut self, row: VehicleLocation) -> Result<()> {
        if !self.location_ids.insert(row.id) {
            bail!("duplicate key value violates unique constraint \"vehicle_locations_pkey\"");
        }
        self.locations.push(row);
        Ok(())
    }

    /// History of one vehicle in (recorded_at, id) order
    fn history(&self, vehicle_id: &str) -> Vec<VehicleLocation> {
        let mut history: Vec<_> = self
            .locations
            .iter()
            .filter(|location| location.vehicle_id == vehicle_id)
            .cloned()
            .collect();
        history.sort_by_key(|location| (location.recorded_at, location.id));
        history
    }

    fn vehicle_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .locations
            .iter()
            .map(|location| location.vehicle_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// In-process store with the same transactional semantics as the PostgreSQL
/// store. Transactions are serialized and write to the live tables; a failed
/// transaction is undone by truncating back to its savepoint.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next commit fail after the transaction body has succeeded
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Insert a location directly, bypassing the ingestion pipeline
    pub fn insert_location(&self, location: &NewVehicleLocation) -> Result<VehicleLocation> {
        let row = location_row(location);
        self.lock().push_location(row.clone())?;
        Ok(row)
    }

    /// Full persisted history of a vehicle in time order
    pub fn history(&self, vehicle_id: &str) -> Vec<VehicleLocation> {
        self.lock().history(vehicle_id)
    }

    pub fn location_count(&self) -> usize {
        self.lock().locations.len()
    }

    pub fn status_log(&self, ride_id: Uuid) -> Vec<RideStatusEvent> {
        let mut events: Vec<_> = self
            .lock()
            .ride_statuses
            .iter()
            .filter(|event| event.ride_id == ride_id)
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.created_at, event.id));
        events
    }
}

/// Holds the store lock for one transaction and undoes its writes on drop
/// unless it committed, including when the transaction body panics.
struct PendingTransaction<'a> {
    tables: MutexGuard<'a, Tables>,
    savepoint: Savepoint,
    committed: bool,
}

impl<'a> PendingTransaction<'a> {
    fn begin(tables: MutexGuard<'a, Tables>) -> Self {
        let savepoint = tables.savepoint();
        Self {
            tables,
            savepoint,
            committed: false,
        }
    }
}

impl Drop for PendingTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.tables.rollback_to(self.savepoint);
        }
    }
}

fn location_row(location: &NewVehicleLocation) -> VehicleLocation {
    VehicleLocation {
        id: location.id,
        vehicle_id: location.vehicle_id.clone(),
        latitude: location.latitude,
        longitude: location.longitude,
        recorded_at: location.recorded_at,
        created_at: Utc::now(),
    }
}

struct MemoryTransaction<'a> {
    tables: &'a mut Tables,
}

impl LocationTransaction for MemoryTransaction<'_> {
    fn latest_location(&mut self, vehicle_id: &str) -> Result<Option<VehicleLocation>> {
        Ok(self
            .tables
            .locations
            .iter()
            .filter(|location| location.vehicle_id == vehicle_id)
            .max_by_key(|location| (location.recorded_at, location.id))
            .cloned())
    }

    fn insert_location(&mut self, location: &NewVehicleLocation) -> Result<Uuid> {
        self.tables.push_location(location_row(location))?;
        Ok(location.id)
    }

    fn location_by_id(&mut self, id: Uuid) -> Result<Option<VehicleLocation>> {
        if !self.tables.location_ids.contains(&id) {
            return Ok(None);
        }
        // Lookups follow an insert, so search from the newest row
        Ok(self
            .tables
            .locations
            .iter()
            .rev()
            .find(|location| location.id == id)
            .cloned())
    }

    fn distance_total(&mut self, vehicle_id: &str) -> Result<Option<DistanceTotal>> {
        Ok(
            total_distance(&self.tables.history(vehicle_id)).map(|aggregate| DistanceTotal {
                vehicle_id: vehicle_id.to_string(),
                total_distance: aggregate.total_distance,
                updated_at: aggregate.updated_at,
            }),
        )
    }

    fn latest_ride_for_vehicle(&mut self, vehicle_id: &str) -> Result<Option<Ride>> {
        Ok(self
            .tables
            .rides
            .iter()
            .filter(|ride| ride.vehicle_id.as_deref() == Some(vehicle_id))
            .max_by_key(|ride| (ride.updated_at, ride.id))
            .cloned())
    }

    fn status_events(&mut self, ride_id: Uuid) -> Result<Vec<RideStatusEvent>> {
        Ok(self
            .tables
            .ride_statuses
            .iter()
            .filter(|event| event.ride_id == ride_id)
            .cloned()
            .collect())
    }

    fn append_status(&mut self, event: &NewRideStatusEvent) -> Result<()> {
        if !self.tables.rides.iter().any(|ride| ride.id == event.ride_id) {
            bail!(
                "insert on ride_statuses violates foreign key: ride {} does not exist",
                event.ride_id
            );
        }
        self.tables.ride_statuses.push(RideStatusEvent {
            id: event.id,
            ride_id: event.ride_id,
            status: event.status,
            created_at: Utc::now(),
        });
        Ok(())
    }
}

impl LocationStore for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LocationTransaction) -> Result<T>,
    {
        let mut pending = PendingTransaction::begin(self.lock());
        let value = f(&mut MemoryTransaction {
            tables: &mut pending.tables,
        })?;

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            bail!("commit failed: injected failure");
        }
        pending.committed = true;
        Ok(value)
    }

    fn latest_locations(&self) -> Result<Vec<VehicleLocation>> {
        let tables = self.lock();
        let mut latest: BTreeMap<&str, &VehicleLocation> = BTreeMap::new();
        for location in &tables.locations {
            let entry = latest.entry(location.vehicle_id.as_str()).or_insert(location);
            if location.is_after(entry) {
                *entry = location;
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    fn distance_totals(&self) -> Result<Vec<DistanceTotal>> {
        let tables = self.lock();
        Ok(tables
            .vehicle_ids()
            .into_iter()
            .filter_map(|vehicle_id| {
                let aggregate = total_distance(&tables.history(&vehicle_id))?;
                Some(DistanceTotal {
                    vehicle_id,
                    total_distance: aggregate.total_distance,
                    updated_at: aggregate.updated_at,
                })
            })
            .collect())
    }

    fn active_ride_counts(&self) -> Result<Vec<ActiveRideCount>> {
        let tables = self.lock();
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for ride in &tables.rides {
            let Some(vehicle_id) = &ride.vehicle_id else {
                continue;
            };
            let events: Vec<_> = tables
                .ride_statuses
                .iter()
                .filter(|event| event.ride_id == ride.id)
                .cloned()
                .collect();
            if current_status(&events).is_none_or(|status| !status.is_terminal()) {
                *counts.entry(vehicle_id.clone()).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(vehicle_id, active_rides)| ActiveRideCount {
                vehicle_id,
                active_rides,
            })
            .collect())
    }

    fn create_ride(&self, ride: &NewRide) -> Result<Ride> {
        let row = Ride {
            id: ride.id,
            vehicle_id: ride.vehicle_id.clone(),
            pickup_latitude: ride.pickup_latitude,
            pickup_longitude: ride.pickup_longitude,
            destination_latitude: ride.destination_latitude,
            destination_longitude: ride.destination_longitude,
            created_at: ride.created_at,
            updated_at: ride.updated_at,
        };
        self.lock().rides.push(row.clone());
        Ok(row)
    }
}
