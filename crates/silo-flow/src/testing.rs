//! Shared test doubles and fixtures for scheduler tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::backend_config::{
    ConfigSnapshot, DestinationConfig, DestinationDefinition, SourceConfig,
};
use crate::binding::{DestinationKind, WarehouseBinding};
use crate::error::{Error, Result};
use crate::manager::WarehouseManager;
use crate::model::{StagingFile, Upload, UploadJob, UploadState};
use crate::notifier::{MemoryNotifier, Notifier};

/// Scripted warehouse driver that records every call.
#[derive(Debug, Default)]
pub struct MockManager {
    run_calls: Mutex<Vec<i64>>,
    recover_calls: Mutex<Vec<String>>,
    fail_uploads: Mutex<HashSet<i64>>,
    fail_recover: AtomicBool,
    run_delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockManager {
    /// Creates a driver that succeeds at everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `run` fail for the given upload id.
    pub fn fail_upload(&self, upload_id: i64) {
        self.fail_uploads
            .lock()
            .expect("mock lock poisoned")
            .insert(upload_id);
    }

    /// Makes `crash_recover` fail until reset.
    pub fn set_fail_recover(&self, fail: bool) {
        self.fail_recover.store(fail, Ordering::SeqCst);
    }

    /// Adds a sleep inside `run` (for concurrency tests).
    pub fn set_run_delay(&self, delay: Duration) {
        *self.run_delay.lock().expect("mock lock poisoned") = Some(delay);
    }

    /// Upload ids passed to `run`, in execution order.
    #[must_use]
    pub fn run_order(&self) -> Vec<i64> {
        self.run_calls.lock().expect("mock lock poisoned").clone()
    }

    /// Destination ids passed to `crash_recover`, in order.
    #[must_use]
    pub fn recovered(&self) -> Vec<String> {
        self.recover_calls.lock().expect("mock lock poisoned").clone()
    }

    /// Highest number of concurrent `run` calls observed.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WarehouseManager for MockManager {
    async fn crash_recover(&self, binding: &WarehouseBinding) -> Result<()> {
        self.recover_calls
            .lock()
            .expect("mock lock poisoned")
            .push(binding.destination_id.clone());
        if self.fail_recover.load(Ordering::SeqCst) {
            return Err(Error::driver("scripted recovery failure"));
        }
        Ok(())
    }

    async fn run(&self, job: &UploadJob) -> Result<()> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = *self.run_delay.lock().expect("mock lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.run_calls
            .lock()
            .expect("mock lock poisoned")
            .push(job.upload.id);
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failed = self
            .fail_uploads
            .lock()
            .expect("mock lock poisoned")
            .contains(&job.upload.id);
        if failed {
            return Err(Error::driver(format!("scripted failure for upload {}", job.upload.id)));
        }
        Ok(())
    }
}

/// Builds a binding for the pair with an empty destination config.
#[must_use]
pub fn test_binding(kind: DestinationKind, source_id: &str, destination_id: &str) -> WarehouseBinding {
    WarehouseBinding {
        source_id: source_id.to_string(),
        source_name: format!("source {source_id}"),
        destination_id: destination_id.to_string(),
        destination_enabled: true,
        destination_type: kind,
        namespace: format!("ns_{source_id}"),
        config: json!({}),
    }
}

/// Builds an upload row in the given state for a binding.
#[must_use]
pub fn test_upload(binding: &WarehouseBinding, id: i64, status: UploadState) -> Upload {
    let now = Utc::now();
    Upload {
        id,
        source_id: binding.source_id.clone(),
        namespace: binding.namespace.clone(),
        destination_id: binding.destination_id.clone(),
        destination_type: binding.destination_type.as_str().to_string(),
        start_staging_file_id: 1,
        end_staging_file_id: 1,
        start_load_file_id: 0,
        end_load_file_id: 0,
        status,
        schema: json!({}),
        error: json!({}),
        timings: json!([]),
        first_event_at: None,
        last_event_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Builds an upload job with no staging files attached.
#[must_use]
pub fn test_job(binding: &WarehouseBinding, upload_id: i64) -> UploadJob {
    test_job_with_notifier(binding, upload_id, Arc::new(MemoryNotifier::new()))
}

/// Builds an upload job sharing the given notifier.
#[must_use]
pub fn test_job_with_notifier(
    binding: &WarehouseBinding,
    upload_id: i64,
    notifier: Arc<dyn Notifier>,
) -> UploadJob {
    UploadJob {
        upload: test_upload(binding, upload_id, UploadState::Waiting),
        staging_files: Vec::<StagingFile>::new(),
        binding: binding.clone(),
        notifier,
    }
}

/// Builds a one-source snapshot with the given destinations.
#[must_use]
pub fn test_snapshot(source_id: &str, source_name: &str, destinations: Vec<DestinationConfig>) -> ConfigSnapshot {
    ConfigSnapshot {
        sources: vec![SourceConfig {
            id: source_id.to_string(),
            name: source_name.to_string(),
            destinations,
        }],
    }
}

/// Builds a destination entry for a snapshot.
#[must_use]
pub fn test_destination(id: &str, kind: DestinationKind, config: serde_json::Value) -> DestinationConfig {
    DestinationConfig {
        id: id.to_string(),
        enabled: true,
        config,
        destination_definition: DestinationDefinition {
            name: kind.as_str().to_string(),
        },
    }
}

/// Polls until `check` returns true or the deadline passes.
pub async fn wait_until(check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within deadline"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
