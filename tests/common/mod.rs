//! Shared helpers for integration tests
//!
//! `TestDatabase` creates an isolated PostgreSQL database per test from the
//! `ridetrack_test_template` template, which gets the embedded migrations
//! applied once per test binary. Tests that need it are `#[ignore]`d; run
//! them with `cargo test -- --ignored` and `TEST_DATABASE_URL` pointing at
//! a server where the user may create databases, e.g.
//! `postgresql://localhost/ridetrack_test`.

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use ridetrack::locations::VehicleLocation;
use std::sync::Once;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

const TEMPLATE_NAME: &str = "ridetrack_test_template";

/// Serializes template cloning across test processes
const TEMPLATE_LOCK_KEY: i64 = 0x7269_6465;

static MIGRATIONS_RUN: Once = Once::new();

type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Fixed base time so report timestamps are deterministic
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(seconds)
}

/// Straight pairwise Manhattan sum over a history in (recorded_at, id) order
pub fn pairwise_distance(history: &[VehicleLocation]) -> i64 {
    history
        .windows(2)
        .map(|pair| pair[0].coordinate().manhattan_distance(&pair[1].coordinate()))
        .sum()
}

fn base_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/ridetrack_test".to_string())
}

fn with_database(base_url: &str, db_name: &str) -> String {
    match base_url.rsplit_once('/') {
        Some((server, _)) => format!("{}/{}", server, db_name),
        None => format!("{}/{}", base_url, db_name),
    }
}

#[derive(QueryableByName)]
struct TemplateExists {
    #[diesel(sql_type = diesel::sql_types::Bool)]
    exists: bool,
}

/// Creates the template database if needed and applies pending migrations
fn ensure_template_migrated() {
    MIGRATIONS_RUN.call_once(|| {
        let base_url = base_url();
        let admin_url = with_database(&base_url, "postgres");
        let template_url = with_database(&base_url, TEMPLATE_NAME);

        if let Ok(mut admin_conn) = PgConnection::establish(&admin_url) {
            let exists = diesel::sql_query(format!(
                "SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = '{}') AS exists",
                TEMPLATE_NAME
            ))
            .get_result::<TemplateExists>(&mut admin_conn)
            .map(|r| r.exists);

            if exists.ok() != Some(true) {
                let _ = diesel::sql_query(format!("CREATE DATABASE {}", TEMPLATE_NAME))
                    .execute(&mut admin_conn);
            }
            let _ = diesel::sql_query(format!(
                "UPDATE pg_database SET datistemplate = FALSE, datallowconn = TRUE \
                 WHERE datname = '{}'",
                TEMPLATE_NAME
            ))
            .execute(&mut admin_conn);
        }

        if let Ok(mut template_conn) = PgConnection::establish(&template_url) {
            match template_conn.run_pending_migrations(MIGRATIONS) {
                Ok(applied) if !applied.is_empty() => {
                    eprintln!("Applied {} migration(s) to test template", applied.len());
                }
                Ok(_) => {}
                Err(e) => eprintln!("Warning: Failed to run migrations on template: {}", e),
            }
        }

        if let Ok(mut admin_conn) = PgConnection::establish(&admin_url) {
            let _ = diesel::sql_query(format!(
                "UPDATE pg_database SET datistemplate = TRUE, datallowconn = FALSE \
                 WHERE datname = '{}'",
                TEMPLATE_NAME
            ))
            .execute(&mut admin_conn);
        }
    });
}

/// An isolated database cloned from the template, dropped on `Drop`.
///
/// Requires PostgreSQL 13+ for `DROP DATABASE ... WITH (FORCE)`.
pub struct TestDatabase {
    db_name: String,
    pool: PgPool,
    admin_url: String,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        ensure_template_migrated();

        let base_url = base_url();
        let admin_url = with_database(&base_url, "postgres");
        let db_name = format!("ridetrack_test_{:016x}", rand::random::<u64>());

        {
            let admin_url = admin_url.clone();
            let db_name = db_name.clone();
            tokio::task::spawn_blocking(move || create_from_template(&admin_url, &db_name))
                .await
                .context("Database creation task panicked")??;
        }

        let manager = ConnectionManager::<PgConnection>::new(with_database(&base_url, &db_name));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .with_context(|| format!("Failed to create connection pool for {}", db_name))?;

        Ok(Self {
            db_name,
            pool,
            admin_url,
        })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn name(&self) -> &str {
        &self.db_name
    }
}

fn create_from_template(admin_url: &str, db_name: &str) -> Result<()> {
    let mut conn = PgConnection::establish(admin_url)
        .context("Failed to connect to PostgreSQL for database creation. Is PostgreSQL running?")?;

    // CREATE DATABASE fails while another session is connected to the
    // template, so clones are taken one at a time across processes
    diesel::sql_query(format!("SELECT pg_advisory_lock({})", TEMPLATE_LOCK_KEY))
        .execute(&mut conn)
        .context("Failed to acquire template lock")?;

    let result = diesel::sql_query(format!(
        "CREATE DATABASE \"{}\" TEMPLATE {}",
        db_name, TEMPLATE_NAME
    ))
    .execute(&mut conn)
    .with_context(|| format!("Failed to create database '{}' from template", db_name));

    let _ = diesel::sql_query(format!("SELECT pg_advisory_unlock({})", TEMPLATE_LOCK_KEY))
        .execute(&mut conn);

    result.map(|_| ())
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let Ok(mut conn) = PgConnection::establish(&self.admin_url) else {
            eprintln!("Warning: could not drop test database '{}'", self.db_name);
            return;
        };
        // db_name is generated hex, safe to interpolate
        let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.db_name);
        if diesel::sql_query(drop_sql).execute(&mut conn).is_err() {
            eprintln!(
                "Warning: Failed to drop test database '{}'. Clean up with: DROP DATABASE {};",
                self.db_name, self.db_name
            );
        }
    }
}
