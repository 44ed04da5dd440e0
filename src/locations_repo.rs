use anyhow::Result;
use diesel::prelude::*;
use diesel::sql_types::Text;
use tracing::debug;
use uuid::Uuid;

use crate::db::{PgPool, PgPooledConnection};
use crate::locations::{DistanceTotal, NewVehicleLocation, VehicleLocation};
use crate::rides::{NewRide, NewRideStatusEvent, Ride, RideStatusEvent};
use crate::schema::{ride_statuses, rides, vehicle_locations};
use crate::store::{ActiveRideCount, LocationStore, LocationTransaction};

/// Pairwise Manhattan distance per vehicle, summed over history ordered by
/// (recorded_at, id). The first row of each vehicle has no predecessor and
/// contributes nothing.
const DISTANCE_TOTALS_SQL: &str = "
    WITH hops AS (
        SELECT vehicle_id,
               recorded_at,
               ABS(latitude::BIGINT - LAG(latitude::BIGINT) OVER w)
                 + ABS(longitude::BIGINT - LAG(longitude::BIGINT) OVER w) AS distance
        FROM vehicle_locations
        WINDOW w AS (PARTITION BY vehicle_id ORDER BY recorded_at, id)
    )
    SELECT vehicle_id,
           COALESCE(SUM(distance), 0)::BIGINT AS total_distance,
           MAX(recorded_at) AS updated_at
    FROM hops
    GROUP BY vehicle_id";

const VEHICLE_DISTANCE_TOTAL_SQL: &str = "
    WITH hops AS (
        SELECT vehicle_id,
               recorded_at,
               ABS(latitude::BIGINT - LAG(latitude::BIGINT) OVER w)
                 + ABS(longitude::BIGINT - LAG(longitude::BIGINT) OVER w) AS distance
        FROM vehicle_locations
        WHERE vehicle_id = $1
        WINDOW w AS (ORDER BY recorded_at, id)
    )
    SELECT vehicle_id,
           COALESCE(SUM(distance), 0)::BIGINT AS total_distance,
           MAX(recorded_at) AS updated_at
    FROM hops
    GROUP BY vehicle_id";

/// Current status of each assigned ride is its latest status event; rides
/// with no events yet count as active.
const ACTIVE_RIDE_COUNTS_SQL: &str = "
    WITH current_statuses AS (
        SELECT DISTINCT ON (r.id) r.id, r.vehicle_id, s.status
        FROM rides r
        LEFT JOIN ride_statuses s ON s.ride_id = r.id
        WHERE r.vehicle_id IS NOT NULL
        ORDER BY r.id, s.created_at DESC NULLS LAST, s.id DESC NULLS LAST
    )
    SELECT vehicle_id, COUNT(*) AS active_rides
    FROM current_statuses
    WHERE status IS NULL OR status NOT IN ('COMPLETED', 'CANCELED')
    GROUP BY vehicle_id";

/// PostgreSQL-backed store for vehicle locations and the ride status log
#[derive(Clone)]
pub struct PgLocationStore {
    pool: PgPool,
}

impl PgLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn get_connection(&self) -> Result<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get database connection: {}", e))
    }
}

struct PgLocationTransaction<'a> {
    conn: &'a mut PgConnection,
}

impl LocationTransaction for PgLocationTransaction<'_> {
    fn latest_location(&mut self, vehicle_id: &str) -> Result<Option<VehicleLocation>> {
        let location = vehicle_locations::table
            .filter(vehicle_locations::vehicle_id.eq(vehicle_id))
            .order((
                vehicle_locations::recorded_at.desc(),
                vehicle_locations::id.desc(),
            ))
            .select(VehicleLocation::as_select())
            .first(self.conn)
            .optional()?;
        Ok(location)
    }

    fn insert_location(&mut self, location: &NewVehicleLocation) -> Result<Uuid> {
        let id = diesel::insert_into(vehicle_locations::table)
            .values(location)
            .returning(vehicle_locations::id)
            .get_result::<Uuid>(self.conn)?;
        Ok(id)
    }

    fn location_by_id(&mut self, id: Uuid) -> Result<Option<VehicleLocation>> {
        let location = vehicle_locations::table
            .filter(vehicle_locations::id.eq(id))
            .select(VehicleLocation::as_select())
            .first(self.conn)
            .optional()?;
        Ok(location)
    }

    fn distance_total(&mut self, vehicle_id: &str) -> Result<Option<DistanceTotal>> {
        let total = diesel::sql_query(VEHICLE_DISTANCE_TOTAL_SQL)
            .bind::<Text, _>(vehicle_id)
            .get_result::<DistanceTotal>(self.conn)
            .optional()?;
        Ok(total)
    }

    fn latest_ride_for_vehicle(&mut self, vehicle_id: &str) -> Result<Option<Ride>> {
        let ride = rides::table
            .filter(rides::vehicle_id.eq(vehicle_id))
            .order((rides::updated_at.desc(), rides::id.desc()))
            .select(Ride::as_select())
            .first(self.conn)
            .optional()?;
        Ok(ride)
    }

    fn status_events(&mut self, ride_id: Uuid) -> Result<Vec<RideStatusEvent>> {
        let events = ride_statuses::table
            .filter(ride_statuses::ride_id.eq(ride_id))
            .select(RideStatusEvent::as_select())
            .load(self.conn)?;
        Ok(events)
    }

    fn append_status(&mut self, event: &NewRideStatusEvent) -> Result<()> {
        diesel::insert_into(ride_statuses::table)
            .values(event)
            .execute(self.conn)?;
        Ok(())
    }
}

impl LocationStore for PgLocationStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LocationTransaction) -> Result<T>,
    {
        let mut conn = self.get_connection()?;
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            let mut tx = PgLocationTransaction { conn };
            f(&mut tx)
        })
    }

    fn latest_locations(&self) -> Result<Vec<VehicleLocation>> {
        let mut conn = self.get_connection()?;
        let locations = vehicle_locations::table
            .order((
                vehicle_locations::vehicle_id,
                vehicle_locations::recorded_at.desc(),
                vehicle_locations::id.desc(),
            ))
            .distinct_on(vehicle_locations::vehicle_id)
            .select(VehicleLocation::as_select())
            .load(&mut conn)?;

        debug!("Loaded latest location for {} vehicles", locations.len());
        Ok(locations)
    }

    fn distance_totals(&self) -> Result<Vec<DistanceTotal>> {
        let mut conn = self.get_connection()?;
        let totals = diesel::sql_query(DISTANCE_TOTALS_SQL).load::<DistanceTotal>(&mut conn)?;

        debug!("Computed distance totals for {} vehicles", totals.len());
        Ok(totals)
    }

    fn active_ride_counts(&self) -> Result<Vec<ActiveRideCount>> {
        let mut conn = self.get_connection()?;
        let counts = diesel::sql_query(ACTIVE_RIDE_COUNTS_SQL).load::<ActiveRideCount>(&mut conn)?;
        Ok(counts)
    }

    fn create_ride(&self, ride: &NewRide) -> Result<Ride> {
        let mut conn = self.get_connection()?;
        let ride = diesel::insert_into(rides::table)
            .values(ride)
            .returning(Ride::as_returning())
            .get_result(&mut conn)?;
        Ok(ride)
    }
}
