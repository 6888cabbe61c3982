//! In-memory store for tests.
//!
//! Mirrors the Postgres implementation's query semantics over plain
//! `BTreeMap`s so scheduler behavior can be exercised deterministically
//! without a database.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::binding::WarehouseBinding;
use crate::error::Result;
use crate::model::{PendingUpload, StagingFile, Upload, UploadState, STAGING_FILE_WAITING_STATE};
use crate::store::{StagingFileDescriptor, WarehouseStore};

#[derive(Debug, Default)]
struct Inner {
    staging_files: BTreeMap<i64, StagingFile>,
    uploads: BTreeMap<i64, Upload>,
    next_staging_file_id: i64,
    next_upload_id: i64,
}

/// In-memory [`WarehouseStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryWarehouseStore {
    inner: Mutex<Inner>,
}

impl MemoryWarehouseStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `count` staging files for the pair and returns their ids.
    pub fn seed_staging_files(
        &self,
        source_id: &str,
        destination_id: &str,
        count: usize,
    ) -> Vec<i64> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let now = Utc::now();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            inner.next_staging_file_id += 1;
            let id = inner.next_staging_file_id;
            inner.staging_files.insert(
                id,
                StagingFile {
                    id,
                    location: format!("s3://staging/{id}.json.gz"),
                    source_id: source_id.to_string(),
                    destination_id: destination_id.to_string(),
                    schema: json!({}),
                    status: STAGING_FILE_WAITING_STATE.to_string(),
                    total_events: 100,
                    first_event_at: Some(now),
                    last_event_at: Some(now),
                    created_at: now,
                    updated_at: now,
                },
            );
            ids.push(id);
        }
        ids
    }

    /// Seeds an upload row directly, returning its id. Test setup only.
    pub fn seed_upload(&self, mut upload: Upload) -> i64 {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.next_upload_id += 1;
        upload.id = inner.next_upload_id;
        let id = upload.id;
        inner.uploads.insert(id, upload);
        id
    }

    /// Rewrites an upload's status in place.
    pub fn set_upload_status(&self, upload_id: i64, status: UploadState) {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if let Some(upload) = inner.uploads.get_mut(&upload_id) {
            upload.status = status;
            upload.updated_at = Utc::now();
        }
    }

    /// Returns a copy of the upload row, if it exists.
    #[must_use]
    pub fn upload(&self, upload_id: i64) -> Option<Upload> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.uploads.get(&upload_id).cloned()
    }

    /// Returns copies of all upload rows, id-ascending.
    #[must_use]
    pub fn uploads(&self) -> Vec<Upload> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.uploads.values().cloned().collect()
    }

    /// Returns a copy of all staging files, id-ascending.
    #[must_use]
    pub fn staging_files(&self) -> Vec<StagingFile> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.staging_files.values().cloned().collect()
    }
}

#[async_trait]
impl WarehouseStore for MemoryWarehouseStore {
    async fn pending_staging_files(&self, binding: &WarehouseBinding) -> Result<Vec<StagingFile>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let last_covered = inner
            .uploads
            .values()
            .filter(|u| {
                u.source_id == binding.source_id
                    && u.destination_id == binding.destination_id
                    && u.destination_type == binding.destination_type.as_str()
                    && u.status.is_terminal()
            })
            .map(|u| u.end_staging_file_id)
            .max()
            .unwrap_or(0);

        Ok(inner
            .staging_files
            .values()
            .filter(|f| {
                f.id > last_covered
                    && f.source_id == binding.source_id
                    && f.destination_id == binding.destination_id
            })
            .cloned()
            .collect())
    }

    async fn staging_files_in_range(
        &self,
        binding: &WarehouseBinding,
        start_id: i64,
        end_id: i64,
    ) -> Result<Vec<StagingFile>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .staging_files
            .range(start_id..=end_id)
            .map(|(_, f)| f)
            .filter(|f| {
                f.source_id == binding.source_id && f.destination_id == binding.destination_id
            })
            .cloned()
            .collect())
    }

    async fn pending_uploads(&self, binding: &WarehouseBinding) -> Result<Vec<PendingUpload>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .uploads
            .values()
            .filter(|u| {
                u.source_id == binding.source_id
                    && u.destination_id == binding.destination_id
                    && u.destination_type == binding.destination_type.as_str()
                    && !u.status.is_terminal()
            })
            .cloned()
            .map(PendingUpload::from)
            .collect())
    }

    async fn create_upload(
        &self,
        binding: &WarehouseBinding,
        files: &[StagingFile],
    ) -> Result<Upload> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.next_upload_id += 1;
        let now = Utc::now();
        let upload = Upload {
            id: inner.next_upload_id,
            source_id: binding.source_id.clone(),
            namespace: binding.namespace.clone(),
            destination_id: binding.destination_id.clone(),
            destination_type: binding.destination_type.as_str().to_string(),
            start_staging_file_id: files.first().map_or(0, |f| f.id),
            end_staging_file_id: files.last().map_or(0, |f| f.id),
            start_load_file_id: 0,
            end_load_file_id: 0,
            status: UploadState::Waiting,
            schema: json!({}),
            error: json!({}),
            timings: json!([]),
            first_event_at: files.first().and_then(|f| f.first_event_at),
            last_event_at: files.last().and_then(|f| f.last_event_at),
            created_at: now,
            updated_at: now,
        };
        inner.uploads.insert(upload.id, upload.clone());
        Ok(upload)
    }

    async fn crash_interrupted_destinations(&self, dest_type: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let mut destinations: Vec<String> = inner
            .uploads
            .values()
            .filter(|u| u.destination_type == dest_type && u.status.is_crash_interrupted())
            .map(|u| u.destination_id.clone())
            .collect();
        destinations.sort();
        destinations.dedup();
        Ok(destinations)
    }

    async fn insert_staging_file(&self, descriptor: &StagingFileDescriptor) -> Result<i64> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.next_staging_file_id += 1;
        let id = inner.next_staging_file_id;
        let now = Utc::now();
        inner.staging_files.insert(
            id,
            StagingFile {
                id,
                location: descriptor.location.clone(),
                source_id: descriptor.source_id.clone(),
                destination_id: descriptor.destination_id.clone(),
                schema: descriptor.schema.clone(),
                status: STAGING_FILE_WAITING_STATE.to_string(),
                total_events: descriptor.total_events,
                first_event_at: descriptor.first_event_at,
                last_event_at: descriptor.last_event_at,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn latest_upload_statuses(
        &self,
        binding: &WarehouseBinding,
        limit: usize,
    ) -> Result<Vec<(i64, UploadState)>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .uploads
            .values()
            .rev()
            .filter(|u| {
                u.source_id == binding.source_id && u.destination_id == binding.destination_id
            })
            .take(limit)
            .map(|u| (u.id, u.status))
            .collect())
    }

    async fn last_recorded_namespace(
        &self,
        source_id: &str,
        destination_id: &str,
    ) -> Result<Option<String>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .uploads
            .values()
            .rev()
            .find(|u| u.source_id == source_id && u.destination_id == destination_id)
            .map(|u| u.namespace.clone()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
