use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use ridetrack::ingest_queue::{LocationJob, LocationSubmitter};
use ridetrack::locations::Coordinate;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// One newline-delimited JSON position report
#[derive(Debug, Deserialize)]
struct PositionReport {
    vehicle_id: String,
    latitude: i32,
    longitude: i32,
    #[serde(default)]
    recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InputStats {
    pub submitted: u64,
    pub malformed: u64,
}

pub(crate) fn parse_report(line: &str) -> Result<LocationJob> {
    let report: PositionReport =
        serde_json::from_str(line).context("Failed to parse position report")?;
    if report.vehicle_id.trim().is_empty() {
        bail!("Position report has an empty vehicle_id");
    }
    Ok(LocationJob::new(
        &report.vehicle_id,
        Coordinate::new(report.latitude, report.longitude),
        report.recorded_at,
    ))
}

/// Submit every well-formed report read from `reader` until EOF.
/// Blank lines are ignored; malformed lines are logged and skipped.
pub(crate) async fn read_reports<R>(reader: R, submitter: &LocationSubmitter) -> Result<InputStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = InputStats::default();
    let mut lines = reader.lines();
    let mut line_number = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_report(line) {
            Ok(job) => {
                submitter.submit_job(job).await?;
                stats.submitted += 1;
            }
            Err(e) => {
                stats.malformed += 1;
                metrics::counter!("ingest.input.malformed").increment(1);
                warn!("Skipping line {}: {:#}", line_number, e);
            }
        }
    }

    info!(
        "Input exhausted: {} reports submitted, {} malformed lines skipped",
        stats.submitted, stats.malformed
    );
    Ok(stats)
}
