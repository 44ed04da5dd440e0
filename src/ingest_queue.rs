//! Bounded FIFO between the producers of position reports and the worker pool.
//!
//! Submitting to a full queue waits for a worker to make room. Reports are
//! never dropped at this layer; the only submit error is a queue whose
//! workers have all gone away.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::locations::Coordinate;
use crate::queue_config::queue_warning_threshold;

/// One position report waiting to be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationJob {
    pub vehicle_id: String,
    pub coordinate: Coordinate,
    pub recorded_at: DateTime<Utc>,
}

impl LocationJob {
    /// Reports without an explicit timestamp are stamped at submission
    pub fn new(
        vehicle_id: &str,
        coordinate: Coordinate,
        recorded_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            coordinate,
            recorded_at: recorded_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Create a queue holding at most `capacity` pending jobs
pub fn bounded(capacity: usize) -> (LocationSubmitter, LocationReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = flume::bounded(capacity);
    (
        LocationSubmitter { tx, capacity },
        LocationReceiver { rx },
    )
}

/// Producer half. Cheap to clone; the queue closes once every clone is dropped.
#[derive(Clone)]
pub struct LocationSubmitter {
    tx: flume::Sender<LocationJob>,
    capacity: usize,
}

impl LocationSubmitter {
    /// Enqueue a report, waiting while the queue is full
    pub async fn submit(
        &self,
        vehicle_id: &str,
        coordinate: Coordinate,
        recorded_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.submit_job(LocationJob::new(vehicle_id, coordinate, recorded_at))
            .await
    }

    pub async fn submit_job(&self, job: LocationJob) -> Result<()> {
        self.note_depth();
        self.tx
            .send_async(job)
            .await
            .map_err(|_| anyhow!("location queue is closed"))?;
        metrics::counter!("ingest.jobs.submitted").increment(1);
        Ok(())
    }

    /// Blocking variant for producers running outside the async runtime
    pub fn submit_blocking(&self, job: LocationJob) -> Result<()> {
        self.note_depth();
        self.tx
            .send(job)
            .map_err(|_| anyhow!("location queue is closed"))?;
        metrics::counter!("ingest.jobs.submitted").increment(1);
        Ok(())
    }

    fn note_depth(&self) {
        let depth = self.tx.len();
        metrics::gauge!("ingest.queue.depth").set(depth as f64);
        if depth >= self.capacity {
            metrics::counter!("ingest.queue.full").increment(1);
        } else if depth > 0 && depth >= queue_warning_threshold(self.capacity) {
            warn!(
                "Location queue at {}/{} jobs, producers will soon block",
                depth, self.capacity
            );
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer half, shared by every worker in the pool
#[derive(Clone)]
pub struct LocationReceiver {
    rx: flume::Receiver<LocationJob>,
}

impl LocationReceiver {
    /// Wait for the next job. Returns `None` once the queue is closed and empty.
    pub async fn dequeue(&self) -> Option<LocationJob> {
        let job = self.rx.recv_async().await.ok()?;
        metrics::gauge!("ingest.queue.depth").set(self.rx.len() as f64);
        Some(job)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let (submitter, receiver) = bounded(10);
        for i in 0..5 {
            submitter
                .submit(&format!("v{i}"), Coordinate::new(i, i), None)
                .await
                .unwrap();
        }
        assert_eq!(receiver.len(), 5);

        for i in 0..5 {
            let job = receiver.dequeue().await.unwrap();
            assert_eq!(job.vehicle_id, format!("v{i}"));
        }
    }

    #[tokio::test]
    async fn test_submit_blocks_when_full() {
        let (submitter, receiver) = bounded(1);
        submitter.submit("v1", Coordinate::new(0, 0), None).await.unwrap();

        let blocked = submitter.clone();
        let pending = tokio::spawn(async move {
            blocked.submit("v2", Coordinate::new(1, 1), None).await
        });

        // The second submit must still be waiting: no error, no drop
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        assert_eq!(receiver.len(), 1);

        let first = receiver.dequeue().await.unwrap();
        assert_eq!(first.vehicle_id, "v1");

        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("submit should complete once a slot frees up")
            .unwrap()
            .unwrap();
        let second = receiver.dequeue().await.unwrap();
        assert_eq!(second.vehicle_id, "v2");
    }

    #[tokio::test]
    async fn test_dequeue_returns_none_after_close() {
        let (submitter, receiver) = bounded(4);
        submitter.submit("v1", Coordinate::new(0, 0), None).await.unwrap();
        drop(submitter);

        assert!(receiver.dequeue().await.is_some());
        assert!(receiver.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_fails_when_receivers_gone() {
        let (submitter, receiver) = bounded(4);
        drop(receiver);
        assert!(
            submitter
                .submit("v1", Coordinate::new(0, 0), None)
                .await
                .is_err()
        );
    }

    #[test]
    fn test_job_defaults_recorded_at() {
        let before = Utc::now();
        let job = LocationJob::new("v1", Coordinate::new(1, 2), None);
        assert!(job.recorded_at >= before);

        let explicit = before - chrono::Duration::minutes(5);
        let job = LocationJob::new("v1", Coordinate::new(1, 2), Some(explicit));
        assert_eq!(job.recorded_at, explicit);
    }
}
