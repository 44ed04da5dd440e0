use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::info;

/// Buckets for per-job latency: 1ms .. 5s
const JOB_DURATION_BUCKETS_MS: &[f64] = &[
    1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

fn prometheus_builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_ms".to_string()),
            JOB_DURATION_BUCKETS_MS,
        )
        .context("failed to set buckets for job duration histograms")
}

/// Install the Prometheus recorder as the global metrics recorder.
/// Returns a handle that renders the current metrics for scraping.
pub fn init_metrics() -> Result<PrometheusHandle> {
    prometheus_builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Background task to update process metrics
/// Updates uptime and memory usage metrics every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status")
                && let Some(kb) = status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<f64>().ok())
            {
                metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Initialize ingestion metrics to zero so they appear in Prometheus before
/// the first report is processed
pub fn initialize_ingest_metrics() {
    // Queue
    metrics::counter!("ingest.jobs.submitted").absolute(0);
    metrics::counter!("ingest.queue.full").absolute(0);
    metrics::gauge!("ingest.queue.depth").set(0.0);

    // Workers
    metrics::counter!("ingest.jobs.processed").absolute(0);
    metrics::counter!("ingest.jobs.failed").absolute(0);
    metrics::gauge!("worker.active", "type" => "location").set(0.0);
    metrics::counter!("ingest.input.malformed").absolute(0);

    // Caches
    for cache in ["latest_position", "total_distance", "active_rides"] {
        metrics::counter!("cache.hit", "cache" => cache).absolute(0);
        metrics::counter!("cache.miss", "cache" => cache).absolute(0);
        metrics::counter!("cache.eviction", "cache" => cache).absolute(0);
    }
    metrics::counter!("cache.distance.recomputed").absolute(0);
    metrics::counter!("cache.distance.invalidated").absolute(0);
}

/// Serve `/metrics` on the specified port until the listener fails
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) -> Result<()> {
    tokio::spawn(process_metrics_task());

    let app = Router::new().route("/metrics", get(move || async move { handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", addr))?;
    axum::serve(listener, app)
        .await
        .context("Metrics server failed")
}
