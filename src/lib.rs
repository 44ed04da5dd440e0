//! ridetrack - vehicle location ingestion for a ride-hailing backend
//!
//! Position reports flow through a bounded queue into a pool of workers.
//! Each worker persists the report, keeps the vehicle's cumulative
//! Manhattan distance, and advances the latest ride to PICKUP or ARRIVED
//! when the vehicle reaches the matching point. LRU caches of the latest
//! position, total distance and active ride count sit in front of the
//! store and are rebuilt from it at startup.

pub mod bounded_cache;
pub mod cache_bootstrap;
pub mod db;
pub mod ingest_config;
pub mod ingest_queue;
pub mod location_cache;
pub mod location_processor;
pub mod location_workers;
pub mod locations;
pub mod locations_repo;
pub mod log_format;
pub mod memory_store;
pub mod metrics;
pub mod queue_config;
pub mod rides;
pub mod schema;
pub mod store;

pub use cache_bootstrap::{BootstrapSummary, bootstrap_caches};
pub use ingest_queue::{LocationJob, LocationReceiver, LocationSubmitter};
pub use location_cache::{CacheCapacities, LocationCaches};
pub use location_processor::{LocationOutcome, LocationProcessor};
pub use location_workers::spawn_location_workers;
pub use locations::{Coordinate, DistanceAggregate, VehicleLocation};
pub use locations_repo::PgLocationStore;
pub use memory_store::MemoryStore;
pub use rides::RideStatus;
pub use store::{LocationStore, LocationTransaction};
