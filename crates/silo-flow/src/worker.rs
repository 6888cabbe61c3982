//! Per-destination upload workers under a global concurrency cap.
//!
//! One long-lived task per worker identity (`<destinationID>_<namespace>`)
//! serialises all uploads for that warehouse instance in enqueue order.
//! Before draining a batch the worker claims a permit from a semaphore
//! shared across every router, which caps concurrent upload batches
//! process-wide.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{Error, Result};
use crate::manager::ManagerRegistry;
use crate::metrics::WarehouseMetrics;
use crate::model::UploadJob;
use crate::registry::SyncRegistry;

/// Batches queued per worker before enqueue starts failing.
pub const WORKER_QUEUE_CAPACITY: usize = 100;

/// The pool of per-destination workers and the global admission
/// semaphore.
pub struct WorkerPool {
    capacity: usize,
    semaphore: Semaphore,
    retry_sleep: Duration,
    senders: RwLock<HashMap<String, mpsc::Sender<Vec<UploadJob>>>>,
    registry: Arc<SyncRegistry>,
    managers: Arc<ManagerRegistry>,
    metrics: WarehouseMetrics,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("active", &self.active_workers())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates a pool with the given global cap.
    #[must_use]
    pub fn new(
        capacity: usize,
        retry_sleep: Duration,
        registry: Arc<SyncRegistry>,
        managers: Arc<ManagerRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            semaphore: Semaphore::new(capacity),
            retry_sleep,
            senders: RwLock::new(HashMap::new()),
            registry,
            managers,
            metrics: WarehouseMetrics::new(),
        })
    }

    /// Ensures a worker task exists for the identity. Idempotent; workers
    /// are never torn down on config churn.
    pub fn ensure_worker(self: &Arc<Self>, identity: &str) {
        let mut senders = self.senders.write().expect("worker map lock poisoned");
        if senders.contains_key(identity) {
            return;
        }
        let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
        senders.insert(identity.to_string(), tx);

        let pool = Arc::clone(self);
        let identity = identity.to_string();
        tokio::spawn(async move {
            pool.worker_loop(&identity, rx).await;
        });
    }

    /// Hands a batch to the identity's worker without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownWorker`] when no worker exists for the
    /// identity and [`Error::QueueFull`] when its queue is at capacity;
    /// the caller drops the batch and retries on a later tick.
    pub fn try_enqueue(&self, identity: &str, batch: Vec<UploadJob>) -> Result<()> {
        let senders = self.senders.read().expect("worker map lock poisoned");
        let Some(sender) = senders.get(identity) else {
            return Err(Error::UnknownWorker {
                identity: identity.to_string(),
            });
        };
        sender.try_send(batch).map_err(|_| Error::QueueFull {
            identity: identity.to_string(),
        })
    }

    /// Number of batches currently holding a worker slot.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// The global concurrency cap.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when a worker task exists for the identity.
    #[must_use]
    pub fn has_worker(&self, identity: &str) -> bool {
        let senders = self.senders.read().expect("worker map lock poisoned");
        senders.contains_key(identity)
    }

    async fn worker_loop(&self, identity: &str, mut rx: mpsc::Receiver<Vec<UploadJob>>) {
        while let Some(batch) = rx.recv().await {
            let Some(first) = batch.first() else {
                continue;
            };
            let pair = first.binding.pair_key();
            let dest_type = first.binding.destination_type.as_str();

            let permit = self.acquire_slot(identity).await;
            self.metrics.set_active_workers(self.active_workers());

            let started = Instant::now();
            self.run_batch(&batch).await;
            self.metrics.observe_batch(dest_type, started);

            drop(permit);
            self.metrics.set_active_workers(self.active_workers());
            self.registry.release(&pair);
        }
    }

    async fn acquire_slot(&self, identity: &str) -> SemaphorePermit<'_> {
        loop {
            match tokio::time::timeout(self.retry_sleep, self.semaphore.acquire()).await {
                Ok(Ok(permit)) => return permit,
                // The semaphore is never closed while the pool is alive.
                Ok(Err(_)) => continue,
                Err(_) => {
                    tracing::debug!(identity, capacity = self.capacity, "waiting for a free worker slot");
                }
            }
        }
    }

    /// Runs the batch's jobs in order. The first failure skips the
    /// remainder of the batch so uploads complete in id order; the pair is
    /// released afterwards and the next tick re-discovers the rest under
    /// the retry gate.
    async fn run_batch(&self, batch: &[UploadJob]) {
        for job in batch {
            let kind = job.binding.destination_type;
            let manager = match self.managers.get(kind) {
                Ok(manager) => manager,
                Err(err) => {
                    tracing::error!(
                        upload_id = job.upload.id,
                        dest_type = kind.as_str(),
                        error = %err,
                        "no driver for destination; failing upload"
                    );
                    self.metrics.record_upload(kind.as_str(), false);
                    break;
                }
            };

            match manager.run(job).await {
                Ok(()) => {
                    self.metrics.record_upload(kind.as_str(), true);
                    self.metrics
                        .record_staging_files_loaded(kind.as_str(), job.staging_files.len());
                    tracing::debug!(
                        upload_id = job.upload.id,
                        staging_files = job.staging_files.len(),
                        "upload completed"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        upload_id = job.upload.id,
                        dest_type = kind.as_str(),
                        error = %err,
                        "upload failed; skipping remainder of batch"
                    );
                    self.metrics.record_upload(kind.as_str(), false);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::DestinationKind;
    use crate::testing::{test_binding, test_job, wait_until, MockManager};

    fn pool_with(
        capacity: usize,
        manager: Arc<MockManager>,
    ) -> (Arc<WorkerPool>, Arc<SyncRegistry>) {
        let registry = Arc::new(SyncRegistry::new());
        let mut managers = ManagerRegistry::new();
        managers.register(DestinationKind::Postgres, manager);
        let pool = WorkerPool::new(
            capacity,
            Duration::from_millis(20),
            Arc::clone(&registry),
            Arc::new(managers),
        );
        (pool, registry)
    }

    #[tokio::test]
    async fn uploads_complete_in_enqueue_order() {
        let manager = Arc::new(MockManager::new());
        let (pool, registry) = pool_with(8, Arc::clone(&manager));
        let binding = test_binding(DestinationKind::Postgres, "src-1", "dst-1");
        let identity = binding.worker_identity();

        pool.ensure_worker(&identity);
        assert!(registry.try_acquire(&binding.pair_key()));
        let batch = vec![
            test_job(&binding, 1),
            test_job(&binding, 2),
            test_job(&binding, 3),
        ];
        pool.try_enqueue(&identity, batch).unwrap();

        wait_until(|| manager.run_order().len() == 3).await;
        assert_eq!(manager.run_order(), vec![1, 2, 3]);
        wait_until(|| !registry.is_in_progress(&binding.pair_key())).await;
    }

    #[tokio::test]
    async fn failure_skips_remainder_of_batch_and_releases_pair() {
        let manager = Arc::new(MockManager::new());
        manager.fail_upload(2);
        let (pool, registry) = pool_with(8, Arc::clone(&manager));
        let binding = test_binding(DestinationKind::Postgres, "src-1", "dst-1");
        let identity = binding.worker_identity();

        pool.ensure_worker(&identity);
        assert!(registry.try_acquire(&binding.pair_key()));
        let batch = vec![
            test_job(&binding, 1),
            test_job(&binding, 2),
            test_job(&binding, 3),
        ];
        pool.try_enqueue(&identity, batch).unwrap();

        wait_until(|| !registry.is_in_progress(&binding.pair_key())).await;
        // Job 3 is skipped to preserve order; job 2 was attempted.
        assert_eq!(manager.run_order(), vec![1, 2]);
    }

    #[tokio::test]
    async fn global_cap_bounds_concurrency_across_workers() {
        let manager = Arc::new(MockManager::new());
        manager.set_run_delay(Duration::from_millis(30));
        let (pool, registry) = pool_with(2, Arc::clone(&manager));

        let mut expected = 0;
        for i in 0..4 {
            let binding =
                test_binding(DestinationKind::Postgres, &format!("src-{i}"), &format!("dst-{i}"));
            let identity = binding.worker_identity();
            pool.ensure_worker(&identity);
            assert!(registry.try_acquire(&binding.pair_key()));
            pool.try_enqueue(&identity, vec![test_job(&binding, i64::from(i) + 1)])
                .unwrap();
            expected += 1;
        }

        wait_until(|| manager.run_order().len() == expected).await;
        assert!(
            manager.max_concurrency() <= 2,
            "cap of 2 exceeded: {}",
            manager.max_concurrency()
        );
        wait_until(|| pool.active_workers() == 0).await;
    }

    #[tokio::test]
    async fn ensure_worker_is_idempotent() {
        let manager = Arc::new(MockManager::new());
        let (pool, _registry) = pool_with(8, manager);
        pool.ensure_worker("dst-1_ns");
        pool.ensure_worker("dst-1_ns");
        assert!(pool.has_worker("dst-1_ns"));
        assert!(!pool.has_worker("dst-2_ns"));
    }

    #[tokio::test]
    async fn enqueue_to_unknown_worker_fails() {
        let manager = Arc::new(MockManager::new());
        let (pool, _registry) = pool_with(8, manager);
        let binding = test_binding(DestinationKind::Postgres, "src-1", "dst-1");
        let err = pool
            .try_enqueue("missing_identity", vec![test_job(&binding, 1)])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownWorker { .. }));
    }

    #[tokio::test]
    async fn unsupported_destination_fails_batch_and_releases_pair() {
        let registry = Arc::new(SyncRegistry::new());
        // Registry with no drivers at all.
        let pool = WorkerPool::new(
            4,
            Duration::from_millis(20),
            Arc::clone(&registry),
            Arc::new(ManagerRegistry::new()),
        );
        let binding = test_binding(DestinationKind::Postgres, "src-1", "dst-1");
        let identity = binding.worker_identity();
        pool.ensure_worker(&identity);
        assert!(registry.try_acquire(&binding.pair_key()));
        pool.try_enqueue(&identity, vec![test_job(&binding, 1)]).unwrap();

        wait_until(|| !registry.is_in_progress(&binding.pair_key())).await;
        assert_eq!(pool.active_workers(), 0);
    }
}
