//! Queue and worker pool sizing for the location pipeline

/// Smallest accepted location queue capacity
pub const MIN_LOCATION_QUEUE_SIZE: usize = 1_000;

/// Largest accepted location queue capacity
/// Each queued job becomes one database transaction, so the cap bounds how far
/// a burst of reports can run ahead of the store
pub const MAX_LOCATION_QUEUE_SIZE: usize = 10_000;

/// Default location queue capacity
pub const DEFAULT_LOCATION_QUEUE_SIZE: usize = MIN_LOCATION_QUEUE_SIZE;

/// Default number of location workers
/// Each worker holds at most one pooled connection at a time
pub const DEFAULT_LOCATION_WORKERS: usize = 4;

/// Calculate the warning threshold for queue depth monitoring
///
/// Returns 80% of queue capacity as the warning threshold. When a queue
/// exceeds this threshold, warnings are logged to indicate potential backpressure.
///
/// # Examples
/// ```
/// use ridetrack::queue_config::queue_warning_threshold;
///
/// assert_eq!(queue_warning_threshold(1000), 800);
/// ```
pub const fn queue_warning_threshold(size: usize) -> usize {
    (size * 80) / 100
}
