//! Observability metrics for the upload scheduler.
//!
//! Exported through the `metrics` crate facade; install a Prometheus
//! recorder at startup to expose them.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `silo_wh_uploads_total` | Counter | `dest_type`, `result` | Upload job outcomes |
//! | `silo_wh_staging_files_loaded_total` | Counter | `dest_type` | Staging files covered by successful uploads |
//! | `silo_wh_upload_batches_dropped_total` | Counter | `dest_type` | Batches dropped on full worker queues |
//! | `silo_wh_crash_recoveries_total` | Counter | `dest_type`, `result` | Crash-recovery attempts |
//! | `silo_wh_active_workers` | Gauge | - | Upload batches currently holding a worker slot |
//! | `silo_wh_main_loop_tick_seconds` | Histogram | `dest_type` | Router tick duration |
//! | `silo_wh_upload_batch_seconds` | Histogram | `dest_type` | End-to-end batch processing time |

use std::time::Instant;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: upload job outcomes.
    pub const UPLOADS_TOTAL: &str = "silo_wh_uploads_total";
    /// Counter: staging files covered by successful uploads.
    pub const STAGING_FILES_LOADED_TOTAL: &str = "silo_wh_staging_files_loaded_total";
    /// Counter: batches dropped because a worker queue was full.
    pub const UPLOAD_BATCHES_DROPPED_TOTAL: &str = "silo_wh_upload_batches_dropped_total";
    /// Counter: crash-recovery attempts.
    pub const CRASH_RECOVERIES_TOTAL: &str = "silo_wh_crash_recoveries_total";
    /// Gauge: batches currently holding a worker slot.
    pub const ACTIVE_WORKERS: &str = "silo_wh_active_workers";
    /// Histogram: router tick duration in seconds.
    pub const MAIN_LOOP_TICK_SECONDS: &str = "silo_wh_main_loop_tick_seconds";
    /// Histogram: end-to-end batch processing time in seconds.
    pub const UPLOAD_BATCH_SECONDS: &str = "silo_wh_upload_batch_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Warehouse kind (`RS`, `BQ`, ...).
    pub const DEST_TYPE: &str = "dest_type";
    /// Outcome (`success` / `failure`).
    pub const RESULT: &str = "result";
}

/// Recording handle for scheduler metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarehouseMetrics;

impl WarehouseMetrics {
    /// Creates a metrics handle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records an upload job outcome.
    pub fn record_upload(&self, dest_type: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        counter!(
            names::UPLOADS_TOTAL,
            labels::DEST_TYPE => dest_type.to_string(),
            labels::RESULT => result,
        )
        .increment(1);
    }

    /// Records staging files covered by a successful upload.
    pub fn record_staging_files_loaded(&self, dest_type: &str, count: usize) {
        counter!(
            names::STAGING_FILES_LOADED_TOTAL,
            labels::DEST_TYPE => dest_type.to_string(),
        )
        .increment(count as u64);
    }

    /// Records a batch dropped on a full worker queue.
    pub fn record_batch_dropped(&self, dest_type: &str) {
        counter!(
            names::UPLOAD_BATCHES_DROPPED_TOTAL,
            labels::DEST_TYPE => dest_type.to_string(),
        )
        .increment(1);
    }

    /// Records a crash-recovery attempt.
    pub fn record_crash_recovery(&self, dest_type: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        counter!(
            names::CRASH_RECOVERIES_TOTAL,
            labels::DEST_TYPE => dest_type.to_string(),
            labels::RESULT => result,
        )
        .increment(1);
    }

    /// Updates the active-worker gauge.
    pub fn set_active_workers(&self, count: usize) {
        gauge!(names::ACTIVE_WORKERS).set(count as f64);
    }

    /// Observes a router tick duration.
    pub fn observe_tick(&self, dest_type: &str, started: Instant) {
        histogram!(
            names::MAIN_LOOP_TICK_SECONDS,
            labels::DEST_TYPE => dest_type.to_string(),
        )
        .record(started.elapsed().as_secs_f64());
    }

    /// Observes an end-to-end batch duration.
    pub fn observe_batch(&self, dest_type: &str, started: Instant) {
        histogram!(
            names::UPLOAD_BATCH_SECONDS,
            labels::DEST_TYPE => dest_type.to_string(),
        )
        .record(started.elapsed().as_secs_f64());
    }
}
