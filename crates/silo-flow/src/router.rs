//! One scheduler instance per warehouse kind.
//!
//! A router owns the main loop for its destination type: it scans each
//! configured (source, destination) binding, drives pending uploads back
//! through the workers, groups fresh staging files into new uploads, and
//! gates both paths on the in-progress registry and the admission
//! predicates. Crash recovery for interrupted exports runs before any
//! other work for the affected destination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;

use crate::backend_config::ConfigSnapshot;
use crate::binding::{resolve_namespace, DestinationKind, WarehouseBinding};
use crate::error::Result;
use crate::gates::{FrequencyGate, RetryGate};
use crate::metrics::WarehouseMetrics;
use crate::model::UploadJob;
use crate::orchestrator::Orchestrator;
use crate::registry::PairKey;

/// Scheduler for one warehouse kind.
pub struct Router {
    dest_type: DestinationKind,
    orch: Arc<Orchestrator>,
    frequency_gate: FrequencyGate,
    retry_gate: RetryGate,
    enabled: AtomicBool,
    bindings: RwLock<Arc<Vec<WarehouseBinding>>>,
    metrics: WarehouseMetrics,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("dest_type", &self.dest_type)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Creates a router without starting its background tasks.
    #[must_use]
    pub fn new(dest_type: DestinationKind, orch: Arc<Orchestrator>) -> Arc<Self> {
        let frequency_gate = orch.frequency_gate();
        let retry_gate = orch.retry_gate();
        Arc::new(Self {
            dest_type,
            orch,
            frequency_gate,
            retry_gate,
            enabled: AtomicBool::new(true),
            bindings: RwLock::new(Arc::new(Vec::new())),
            metrics: WarehouseMetrics::new(),
        })
    }

    /// Creates a router, seeds the crash-recovery set, and starts the
    /// config-subscriber and main-loop tasks.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the interrupted-upload scan fails;
    /// callers treat this as fatal.
    pub async fn setup(dest_type: DestinationKind, orch: Arc<Orchestrator>) -> Result<Arc<Self>> {
        tracing::info!(dest_type = dest_type.as_str(), "warehouse router started");
        let router = Self::new(dest_type, orch);
        router.seed_recovery_set().await?;

        let subscriber = Arc::clone(&router);
        let rx = router.orch.feed.subscribe();
        tokio::spawn(async move {
            subscriber.run_config_subscriber(rx).await;
        });

        let main_loop = Arc::clone(&router);
        tokio::spawn(async move {
            main_loop.run_main_loop().await;
        });

        Ok(router)
    }

    /// The warehouse kind this router schedules.
    #[must_use]
    pub const fn dest_type(&self) -> DestinationKind {
        self.dest_type
    }

    /// Lets the main loop schedule work again.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Stops the main loop from starting new work. In-flight workers
    /// finish their batches regardless.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// True when the main loop is scheduling work.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Marks destinations whose exports a prior process left in flight.
    ///
    /// Only kinds on the crash-recover list carry destination-side state
    /// that needs cleanup; everything else re-enters at batch granularity
    /// through the normal pending-uploads path.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the scan fails.
    pub async fn seed_recovery_set(&self) -> Result<()> {
        if !self.dest_type.crash_recover_enabled() {
            return Ok(());
        }
        let destinations = self
            .orch
            .store
            .crash_interrupted_destinations(self.dest_type.as_str())
            .await?;
        for destination_id in destinations {
            tracing::info!(
                dest_type = self.dest_type.as_str(),
                destination = %destination_id,
                "marking destination for crash recovery"
            );
            self.orch.registry.mark_recovery(destination_id);
        }
        Ok(())
    }

    /// Rebuilds this router's bindings from a config snapshot, ensures a
    /// worker per identity, and fires the one-shot side tasks.
    pub async fn apply_snapshot(&self, snapshot: &ConfigSnapshot) {
        let mut bindings = Vec::new();
        for source in &snapshot.sources {
            for dest in &source.destinations {
                if dest.destination_definition.name != self.dest_type.as_str() {
                    continue;
                }

                let prior = match self
                    .orch
                    .store
                    .last_recorded_namespace(&source.id, &dest.id)
                    .await
                {
                    Ok(prior) => prior,
                    Err(err) => {
                        tracing::warn!(
                            source = %source.id,
                            destination = %dest.id,
                            error = %err,
                            "namespace lookup failed; skipping binding until next snapshot"
                        );
                        continue;
                    }
                };
                let namespace = match resolve_namespace(
                    self.dest_type,
                    &dest.config,
                    prior,
                    &source.name,
                ) {
                    Ok(namespace) => namespace,
                    Err(err) => {
                        tracing::warn!(
                            source = %source.id,
                            destination = %dest.id,
                            error = %err,
                            "cannot resolve namespace; skipping binding"
                        );
                        continue;
                    }
                };

                let binding = WarehouseBinding {
                    source_id: source.id.clone(),
                    source_name: source.name.clone(),
                    destination_id: dest.id.clone(),
                    destination_enabled: dest.enabled,
                    destination_type: self.dest_type,
                    namespace,
                    config: dest.config.clone(),
                };

                self.orch.workers.ensure_worker(&binding.worker_identity());

                if binding.destination_enabled && binding.event_delivery_enabled() {
                    self.spawn_status_sync(binding.clone());
                }
                if binding.test_connection_requested() {
                    self.spawn_connection_test(binding.clone());
                }
                if self.dest_type.identity_enabled() && binding.destination_enabled {
                    self.spawn_identity_setup(binding.clone());
                }

                bindings.push(binding);
            }
        }

        tracing::debug!(
            dest_type = self.dest_type.as_str(),
            bindings = bindings.len(),
            "applied config snapshot"
        );
        *self.bindings.write().expect("bindings lock poisoned") = Arc::new(bindings);
    }

    /// The bindings from the latest applied snapshot.
    #[must_use]
    pub fn current_bindings(&self) -> Arc<Vec<WarehouseBinding>> {
        self.bindings.read().expect("bindings lock poisoned").clone()
    }

    /// One main-loop pass over every binding.
    ///
    /// # Errors
    ///
    /// Returns a storage error when a core metadata query fails; the main
    /// loop treats this as fatal.
    pub async fn tick(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let started = Instant::now();
        let bindings = self.current_bindings();
        for binding in bindings.iter() {
            self.process_binding(binding).await?;
        }
        self.metrics.observe_tick(self.dest_type.as_str(), started);
        Ok(())
    }

    async fn process_binding(&self, binding: &WarehouseBinding) -> Result<()> {
        let pair = binding.pair_key();
        if !self.orch.registry.try_acquire(&pair) {
            tracing::debug!(
                dest_type = self.dest_type.as_str(),
                pair = %pair,
                "skipping binding; upload in progress"
            );
            return Ok(());
        }

        if self.orch.registry.needs_recovery(&binding.destination_id)
            && !self.crash_recover(binding).await
        {
            self.orch.registry.release(&pair);
            return Ok(());
        }

        let pending = match self.orch.store.pending_uploads(binding).await {
            Ok(pending) => pending,
            Err(err) => {
                self.orch.registry.release(&pair);
                return Err(err);
            }
        };

        if pending.is_empty() {
            return self.schedule_fresh_uploads(binding, &pair).await;
        }

        tracing::info!(
            dest_type = self.dest_type.as_str(),
            pair = %pair,
            pending = pending.len(),
            "found pending uploads"
        );
        let now = Utc::now();
        let mut batch = Vec::new();
        for upload in pending {
            if !self.retry_gate.may_start(&upload, now) {
                tracing::debug!(
                    upload_id = upload.upload.id,
                    attempts = upload.attempts,
                    "retry gate closed; leaving upload for operator action"
                );
                break;
            }
            let files = match self
                .orch
                .store
                .staging_files_in_range(
                    binding,
                    upload.upload.start_staging_file_id,
                    upload.upload.end_staging_file_id,
                )
                .await
            {
                Ok(files) => files,
                Err(err) => {
                    self.orch.registry.release(&pair);
                    return Err(err);
                }
            };
            batch.push(UploadJob {
                upload: upload.upload,
                staging_files: files,
                binding: binding.clone(),
                notifier: Arc::clone(&self.orch.notifier),
            });
        }

        if batch.is_empty() {
            self.orch.registry.release(&pair);
            return Ok(());
        }
        self.enqueue(binding, batch);
        Ok(())
    }

    async fn schedule_fresh_uploads(
        &self,
        binding: &WarehouseBinding,
        pair: &PairKey,
    ) -> Result<()> {
        let now = Utc::now();
        let may_start = self.frequency_gate.may_start(
            self.orch.registry.last_exec(pair),
            binding.sync_frequency_mins(),
            now,
        );
        if !may_start {
            tracing::debug!(pair = %pair, "upload frequency not exceeded; skipping");
            self.orch.registry.release(pair);
            return Ok(());
        }
        // Recorded before the run, not after: a long upload must not make
        // the pair eligible again the moment it finishes.
        self.orch.registry.record_last_exec(pair, now.timestamp());

        let files = match self.orch.store.pending_staging_files(binding).await {
            Ok(files) => files,
            Err(err) => {
                self.orch.registry.release(pair);
                return Err(err);
            }
        };
        if files.is_empty() {
            tracing::debug!(pair = %pair, "no pending staging files");
            self.orch.registry.release(pair);
            return Ok(());
        }
        tracing::info!(
            dest_type = self.dest_type.as_str(),
            pair = %pair,
            staging_files = files.len(),
            "found pending staging files"
        );

        let mut batch = Vec::new();
        for chunk in files.chunks(self.orch.config.staging_files_batch_size) {
            let upload = match self.orch.store.create_upload(binding, chunk).await {
                Ok(upload) => upload,
                Err(err) => {
                    self.orch.registry.release(pair);
                    return Err(err);
                }
            };
            batch.push(UploadJob {
                upload,
                staging_files: chunk.to_vec(),
                binding: binding.clone(),
                notifier: Arc::clone(&self.orch.notifier),
            });
        }
        self.enqueue(binding, batch);
        Ok(())
    }

    /// Runs crash recovery for the binding's destination. Returns true
    /// when the destination is clear to schedule uploads.
    async fn crash_recover(&self, binding: &WarehouseBinding) -> bool {
        let manager = match self.orch.managers.get(self.dest_type) {
            Ok(manager) => manager,
            Err(err) => {
                tracing::error!(
                    dest_type = self.dest_type.as_str(),
                    error = %err,
                    "cannot crash recover without a driver"
                );
                self.metrics.record_crash_recovery(self.dest_type.as_str(), false);
                return false;
            }
        };

        tracing::info!(
            dest_type = self.dest_type.as_str(),
            destination = %binding.destination_id,
            "crash recovering destination"
        );
        match manager.crash_recover(binding).await {
            Ok(()) => {
                self.orch.registry.clear_recovery(&binding.destination_id);
                self.metrics.record_crash_recovery(self.dest_type.as_str(), true);
                true
            }
            Err(err) => {
                tracing::warn!(
                    dest_type = self.dest_type.as_str(),
                    destination = %binding.destination_id,
                    error = %err,
                    "crash recovery failed; will retry next tick"
                );
                self.metrics.record_crash_recovery(self.dest_type.as_str(), false);
                false
            }
        }
    }

    fn enqueue(&self, binding: &WarehouseBinding, batch: Vec<UploadJob>) {
        let identity = binding.worker_identity();
        self.orch.workers.ensure_worker(&identity);
        if let Err(err) = self.orch.workers.try_enqueue(&identity, batch) {
            // Dropping beats blocking here: a stalled worker must not
            // stall scheduling for every other destination. Created
            // uploads stay Waiting and are re-discovered next tick.
            tracing::warn!(%identity, error = %err, "worker queue full; dropping batch");
            self.metrics.record_batch_dropped(self.dest_type.as_str());
            self.orch.registry.release(&binding.pair_key());
        }
    }

    async fn run_main_loop(self: Arc<Self>) {
        loop {
            if self.is_enabled() {
                if let Err(err) = self.tick().await {
                    tracing::error!(
                        dest_type = self.dest_type.as_str(),
                        error = %err,
                        "metadata store failure in main loop; aborting process"
                    );
                    std::process::exit(1);
                }
            }
            tokio::time::sleep(self.orch.config.main_loop_sleep()).await;
        }
    }

    async fn run_config_subscriber(
        self: Arc<Self>,
        mut rx: watch::Receiver<Arc<ConfigSnapshot>>,
    ) {
        let snapshot = rx.borrow_and_update().clone();
        self.apply_snapshot(&snapshot).await;
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            self.apply_snapshot(&snapshot).await;
        }
    }

    fn spawn_status_sync(&self, binding: WarehouseBinding) {
        let store = Arc::clone(&self.orch.store);
        let count = self.orch.config.warehouse_sync_pre_fetch_count;
        tokio::spawn(async move {
            match store.latest_upload_statuses(&binding, count).await {
                Ok(statuses) => tracing::info!(
                    destination = %binding.destination_id,
                    statuses = statuses.len(),
                    "synced live upload statuses"
                ),
                Err(err) => tracing::warn!(
                    destination = %binding.destination_id,
                    error = %err,
                    "live upload status sync failed"
                ),
            }
        });
    }

    fn spawn_connection_test(&self, binding: WarehouseBinding) {
        let Ok(manager) = self.orch.managers.get(self.dest_type) else {
            tracing::warn!(
                dest_type = self.dest_type.as_str(),
                destination = %binding.destination_id,
                "connection test requested but no driver is registered"
            );
            return;
        };
        tokio::spawn(async move {
            match manager.test_connection(&binding).await {
                Ok(()) => tracing::info!(
                    destination = %binding.destination_id,
                    "destination connection test passed"
                ),
                Err(err) => tracing::warn!(
                    destination = %binding.destination_id,
                    error = %err,
                    "destination connection test failed"
                ),
            }
        });
    }

    fn spawn_identity_setup(&self, binding: WarehouseBinding) {
        let Ok(manager) = self.orch.managers.get(self.dest_type) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = manager.setup_identity_tables(&binding).await {
                tracing::warn!(
                    destination = %binding.destination_id,
                    error = %err,
                    "identity table setup failed"
                );
            }
        });
    }
}
