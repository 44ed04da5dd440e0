use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ingest_queue::LocationReceiver;
use crate::location_processor::LocationProcessor;
use crate::store::LocationStore;

/// Spawn `count` workers sharing one receiver.
///
/// Each job runs on the blocking pool since the store is synchronous. A
/// failed job is logged and dropped; the worker moves on to the next one.
/// Workers exit when the queue is closed and drained, or as soon as
/// `shutdown` is cancelled (pending jobs are then left in the queue).
pub fn spawn_location_workers<S: LocationStore>(
    receiver: LocationReceiver,
    processor: LocationProcessor<S>,
    count: usize,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let count = count.max(1);
    info!("Spawning {} location workers", count);

    (0..count)
        .map(|worker_id| {
            let receiver = receiver.clone();
            let processor = processor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(run_worker(worker_id, receiver, processor, shutdown))
        })
        .collect()
}

async fn run_worker<S: LocationStore>(
    worker_id: usize,
    receiver: LocationReceiver,
    processor: LocationProcessor<S>,
    shutdown: CancellationToken,
) {
    let mut jobs_processed = 0u64;
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Location worker {} cancelled", worker_id);
                break;
            }
            job = receiver.dequeue() => job,
        };
        let Some(job) = job else {
            break;
        };

        metrics::gauge!("worker.active", "type" => "location").increment(1.0);
        let vehicle_id = job.vehicle_id.clone();
        let job_processor = processor.clone();
        match tokio::task::spawn_blocking(move || job_processor.process(&job)).await {
            Ok(Ok(outcome)) => {
                jobs_processed += 1;
                metrics::counter!("ingest.jobs.processed").increment(1);
                debug!(
                    "Vehicle {} at ({}, {}), total distance {}",
                    vehicle_id,
                    outcome.location.latitude,
                    outcome.location.longitude,
                    outcome.distance.total_distance
                );
            }
            Ok(Err(e)) => {
                metrics::counter!("ingest.jobs.failed").increment(1);
                warn!("Dropping location report for vehicle {}: {:#}", vehicle_id, e);
            }
            Err(e) => {
                metrics::counter!("ingest.jobs.failed").increment(1);
                error!(
                    "Location worker {} panicked on report for vehicle {}: {}",
                    worker_id, vehicle_id, e
                );
            }
        }
        metrics::gauge!("worker.active", "type" => "location").decrement(1.0);
    }
    info!(
        "Location worker {} stopped after processing {} reports",
        worker_id, jobs_processed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest_queue;
    use crate::location_cache::LocationCaches;
    use crate::locations::Coordinate;
    use crate::memory_store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn processor(store: &MemoryStore) -> LocationProcessor<MemoryStore> {
        LocationProcessor::new(store.clone(), Arc::new(LocationCaches::default()))
    }

    #[tokio::test]
    async fn test_workers_drain_queue_after_close() {
        let store = MemoryStore::new();
        let (submitter, receiver) = ingest_queue::bounded(100);
        let t0 = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();

        for i in 0..50 {
            submitter
                .submit(
                    &format!("v{}", i % 5),
                    Coordinate::new(i, 0),
                    Some(t0 + Duration::seconds(i as i64)),
                )
                .await
                .unwrap();
        }
        drop(submitter);

        let handles = spawn_location_workers(
            receiver.clone(),
            processor(&store),
            4,
            CancellationToken::new(),
        );
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.location_count(), 50);
        assert!(receiver.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_workers_leave_queue_untouched() {
        let store = MemoryStore::new();
        let (submitter, receiver) = ingest_queue::bounded(10);
        for i in 0..5 {
            submitter
                .submit("v1", Coordinate::new(i, i), None)
                .await
                .unwrap();
        }

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let handles = spawn_location_workers(receiver.clone(), processor(&store), 2, shutdown);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.location_count(), 0);
        assert_eq!(receiver.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_worker() {
        let store = MemoryStore::new();
        let (submitter, receiver) = ingest_queue::bounded(10);
        submitter.submit("v1", Coordinate::new(0, 0), None).await.unwrap();
        submitter.submit("v1", Coordinate::new(1, 1), None).await.unwrap();
        drop(submitter);

        store.fail_next_commit();
        let handles =
            spawn_location_workers(receiver, processor(&store), 1, CancellationToken::new());
        for handle in handles {
            handle.await.unwrap();
        }

        let history = store.history("v1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].coordinate(), Coordinate::new(1, 1));
    }
}
