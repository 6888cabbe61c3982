//! Pluggable storage for staging-file and upload state.
//!
//! The [`WarehouseStore`] trait defines the persistence layer over the
//! two metadata tables (`wh_staging_files`, `wh_uploads`). All reads are
//! simple single-statement queries and all writes are unconditional
//! inserts; the at-most-one-in-progress invariant lives in the registry,
//! not in SQL.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::binding::WarehouseBinding;
use crate::error::Result;
use crate::model::{PendingUpload, StagingFile, Upload, UploadState};

/// A staging-file registration, as received by the ingress.
#[derive(Debug, Clone)]
pub struct StagingFileDescriptor {
    /// Object-storage location of the JSON blob.
    pub location: String,
    /// Event schema captured by the ingress.
    pub schema: Value,
    /// Originating source id.
    pub source_id: String,
    /// Target destination id.
    pub destination_id: String,
    /// Number of events in the blob.
    pub total_events: i64,
    /// Timestamp of the earliest event, when known.
    pub first_event_at: Option<DateTime<Utc>>,
    /// Timestamp of the latest event, when known.
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Storage abstraction over the warehouse metadata tables.
///
/// Implementations must be safe for concurrent use; the Postgres
/// implementation is shared by every router, worker, and the ingress.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Staging files for the pair that no terminal upload covers yet.
    ///
    /// Finds the greatest `end_staging_file_id` over the pair's uploads in
    /// `{ExportedData, Aborted}` and returns all staging files with a
    /// greater id, ascending. With no terminal upload the scan starts
    /// from zero.
    async fn pending_staging_files(&self, binding: &WarehouseBinding) -> Result<Vec<StagingFile>>;

    /// Staging files for the pair in the inclusive id range `[start, end]`,
    /// ascending.
    async fn staging_files_in_range(
        &self,
        binding: &WarehouseBinding,
        start_id: i64,
        end_id: i64,
    ) -> Result<Vec<StagingFile>>;

    /// Non-terminal uploads for the pair, id-ascending, with retry
    /// bookkeeping extracted from their `timings` and `error` JSON.
    async fn pending_uploads(&self, binding: &WarehouseBinding) -> Result<Vec<PendingUpload>>;

    /// Inserts a `Waiting` upload covering the given staging files and
    /// returns the created row.
    ///
    /// `first_event_at` / `last_event_at` come from the first and last
    /// file in the batch (absent when the files carry none).
    async fn create_upload(
        &self,
        binding: &WarehouseBinding,
        files: &[StagingFile],
    ) -> Result<Upload>;

    /// Destination ids of this warehouse kind with an upload interrupted
    /// mid-export (`ExportingData` / `ExportingDataFailed`).
    async fn crash_interrupted_destinations(&self, dest_type: &str) -> Result<Vec<String>>;

    /// Registers a staging file (ingress write); returns the new row id.
    async fn insert_staging_file(&self, descriptor: &StagingFileDescriptor) -> Result<i64>;

    /// Last `limit` upload (id, status) pairs for the pair, newest first.
    /// Feeds the live-status sync for event-delivery destinations.
    async fn latest_upload_statuses(
        &self,
        binding: &WarehouseBinding,
        limit: usize,
    ) -> Result<Vec<(i64, UploadState)>>;

    /// Namespace recorded by the most recent upload for the pair, if any.
    async fn last_recorded_namespace(
        &self,
        source_id: &str,
        destination_id: &str,
    ) -> Result<Option<String>>;

    /// Cheap connectivity probe for the health endpoint.
    async fn ping(&self) -> Result<()>;
}
