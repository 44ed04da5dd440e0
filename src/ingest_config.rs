use std::num::NonZeroUsize;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

use crate::location_cache::{CacheCapacities, DEFAULT_CACHE_CAPACITY};
use crate::queue_config::{
    DEFAULT_LOCATION_QUEUE_SIZE, DEFAULT_LOCATION_WORKERS, MAX_LOCATION_QUEUE_SIZE,
    MIN_LOCATION_QUEUE_SIZE,
};

/// Default r2d2 pool size; one connection per worker plus headroom for bootstrap
pub const DEFAULT_DATABASE_POOL_SIZE: u32 = 10;

/// Runtime configuration for the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub database_url: Option<String>,
    pub queue_capacity: usize,
    pub workers: usize,
    pub caches: CacheCapacities,
    pub database_pool_size: u32,
    pub metrics_port: Option<u16>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            queue_capacity: DEFAULT_LOCATION_QUEUE_SIZE,
            workers: DEFAULT_LOCATION_WORKERS,
            caches: CacheCapacities::default(),
            database_pool_size: DEFAULT_DATABASE_POOL_SIZE,
            metrics_port: None,
        }
    }
}

impl IngestConfig {
    /// Read configuration from the process environment. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value. Unset and empty variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            database_url: value("DATABASE_URL"),
            queue_capacity: parse_var(value("INGEST_QUEUE_CAPACITY"), "INGEST_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
            workers: parse_var(value("INGEST_WORKERS"), "INGEST_WORKERS")?
                .unwrap_or(defaults.workers),
            caches: CacheCapacities {
                positions: cache_capacity(
                    value("POSITION_CACHE_CAPACITY"),
                    "POSITION_CACHE_CAPACITY",
                )?,
                distances: cache_capacity(
                    value("DISTANCE_CACHE_CAPACITY"),
                    "DISTANCE_CACHE_CAPACITY",
                )?,
                active_rides: cache_capacity(
                    value("ACTIVE_RIDE_CACHE_CAPACITY"),
                    "ACTIVE_RIDE_CACHE_CAPACITY",
                )?,
            },
            database_pool_size: parse_var(value("DATABASE_POOL_SIZE"), "DATABASE_POOL_SIZE")?
                .unwrap_or(defaults.database_pool_size),
            metrics_port: parse_var(value("METRICS_PORT"), "METRICS_PORT")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the environment
    pub fn with_overrides(
        mut self,
        queue_capacity: Option<usize>,
        workers: Option<usize>,
    ) -> Result<Self> {
        if let Some(capacity) = queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(workers) = workers {
            self.workers = workers;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_LOCATION_QUEUE_SIZE..=MAX_LOCATION_QUEUE_SIZE).contains(&self.queue_capacity) {
            bail!(
                "INGEST_QUEUE_CAPACITY must be between {} and {}, got {}",
                MIN_LOCATION_QUEUE_SIZE,
                MAX_LOCATION_QUEUE_SIZE,
                self.queue_capacity
            );
        }
        if self.workers == 0 {
            bail!("INGEST_WORKERS must be at least 1");
        }
        if self.database_pool_size == 0 {
            bail!("DATABASE_POOL_SIZE must be at least 1");
        }
        Ok(())
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL environment variable must be set")
    }
}

fn parse_var<T>(value: Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {} value {:?}", name, v))
        })
        .transpose()
}

fn cache_capacity(value: Option<String>, name: &str) -> Result<NonZeroUsize> {
    match parse_var::<usize>(value, name)? {
        None => NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).context("default cache capacity is zero"),
        Some(capacity) => NonZeroUsize::new(capacity)
            .with_context(|| format!("{} must be at least 1", name)),
    }
}
