mod input;
mod shutdown;

use anyhow::{Context, Result};
use ridetrack::cache_bootstrap::bootstrap_caches;
use ridetrack::db;
use ridetrack::ingest_config::IngestConfig;
use ridetrack::ingest_queue;
use ridetrack::location_cache::LocationCaches;
use ridetrack::location_processor::LocationProcessor;
use ridetrack::location_workers::spawn_location_workers;
use ridetrack::locations_repo::PgLocationStore;
use ridetrack::memory_store::MemoryStore;
use ridetrack::store::LocationStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use input::InputStats;

/// Where position reports are read from
#[derive(Debug, Clone)]
pub enum ReportSource {
    Stdin,
    File(PathBuf),
}

impl ReportSource {
    /// `None` and `-` both mean standard input
    pub fn from_arg(arg: Option<PathBuf>) -> Self {
        match arg {
            Some(path) if path.as_os_str() != "-" => ReportSource::File(path),
            _ => ReportSource::Stdin,
        }
    }
}

pub async fn handle_run(config: IngestConfig, source: ReportSource, memory: bool) -> Result<()> {
    info!(
        "Starting run command with queue capacity {}, {} workers",
        config.queue_capacity, config.workers
    );

    if let Some(port) = config.metrics_port {
        let handle = ridetrack::metrics::init_metrics()?;
        ridetrack::metrics::initialize_ingest_metrics();
        tokio::spawn(async move {
            if let Err(e) = ridetrack::metrics::start_metrics_server(port, handle).await {
                error!("Metrics server stopped: {:#}", e);
            }
        });
    }

    let caches = Arc::new(LocationCaches::new(config.caches));

    if memory {
        warn!("Using the in-memory store: nothing will be persisted");
        return run_pipeline(MemoryStore::new(), caches, &config, source).await;
    }

    let database_url = config.require_database_url()?.to_string();
    let pool_size = config.database_pool_size;
    let pool = tokio::task::spawn_blocking(move || {
        let pool = db::build_pool(&database_url, pool_size)?;
        db::run_migrations(&pool)?;
        Ok::<_, anyhow::Error>(pool)
    })
    .await
    .context("Database setup task panicked")??;

    run_pipeline(PgLocationStore::new(pool), caches, &config, source).await
}

async fn run_pipeline<S: LocationStore>(
    store: S,
    caches: Arc<LocationCaches>,
    config: &IngestConfig,
    source: ReportSource,
) -> Result<()> {
    // Caches must be warm before the first job is dequeued
    {
        let store = store.clone();
        let caches = caches.clone();
        tokio::task::spawn_blocking(move || bootstrap_caches(&store, &caches))
            .await
            .context("Cache bootstrap task panicked")?
            .context("Cache bootstrap failed")?;
    }

    let (submitter, receiver) = ingest_queue::bounded(config.queue_capacity);
    let shutdown = CancellationToken::new();
    shutdown::spawn_shutdown_handler(shutdown.clone());

    let processor = LocationProcessor::new(store, caches);
    let workers = spawn_location_workers(receiver, processor, config.workers, shutdown.clone());

    let stats = match source {
        ReportSource::Stdin => {
            info!("Reading position reports from stdin");
            feed(BufReader::new(tokio::io::stdin()), submitter, &shutdown).await?
        }
        ReportSource::File(path) => {
            info!("Reading position reports from {}", path.display());
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            feed(BufReader::new(file), submitter, &shutdown).await?
        }
    };

    if stats.is_some() {
        info!("Input closed, waiting for workers to drain the queue");
    }
    for handle in workers {
        handle.await.context("Location worker panicked")?;
    }

    shutdown.cancel();
    info!("Run command finished");
    Ok(())
}

/// Submit reports until EOF or cancellation. Dropping the submitter on
/// return closes the queue so the workers can drain and exit.
async fn feed<R>(
    reader: R,
    submitter: ingest_queue::LocationSubmitter,
    shutdown: &CancellationToken,
) -> Result<Option<InputStats>>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        result = input::read_reports(reader, &submitter) => result.map(Some),
        _ = shutdown.cancelled() => {
            info!("Stopped reading input after shutdown signal");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_source_from_arg() {
        assert!(matches!(ReportSource::from_arg(None), ReportSource::Stdin));
        assert!(matches!(
            ReportSource::from_arg(Some(PathBuf::from("-"))),
            ReportSource::Stdin
        ));
        assert!(matches!(
            ReportSource::from_arg(Some(PathBuf::from("reports.ndjson"))),
            ReportSource::File(_)
        ));
    }

    #[tokio::test]
    async fn test_memory_pipeline_processes_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        for (lat, lon, second) in [(0, 0, 0), (3, 4, 1), (3, 4, 2)] {
            writeln!(
                file,
                r#"{{"vehicle_id":"v1","latitude":{lat},"longitude":{lon},"recorded_at":"2025-05-01T08:00:0{second}Z"}}"#
            )
            .unwrap();
        }
        file.flush().unwrap();

        let store = MemoryStore::new();
        let caches = Arc::new(LocationCaches::default());
        let config = IngestConfig {
            workers: 1,
            ..IngestConfig::default()
        };

        run_pipeline(
            store.clone(),
            caches.clone(),
            &config,
            ReportSource::File(file.path().to_path_buf()),
        )
        .await
        .unwrap();

        assert_eq!(store.location_count(), 3);
        assert_eq!(caches.total_distance("v1").unwrap().total_distance, 7);
    }
}
