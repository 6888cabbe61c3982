//! The shared scheduler state, constructed once at startup.
//!
//! Routers, workers, and the supervisor all hold the same
//! [`Orchestrator`] value: one registry, one worker pool, one store
//! handle, one config feed. Nothing here is global; embedding processes
//! can construct more than one.

use std::sync::Arc;

use silo_core::WarehouseConfig;

use crate::backend_config::ConfigFeed;
use crate::gates::{FrequencyGate, RetryGate};
use crate::manager::ManagerRegistry;
use crate::notifier::Notifier;
use crate::registry::SyncRegistry;
use crate::store::WarehouseStore;
use crate::supervisor::RouterSupervisor;
use crate::worker::WorkerPool;

/// Shared ownership of everything the scheduling layer needs.
pub struct Orchestrator {
    /// Runtime configuration.
    pub config: WarehouseConfig,
    /// Metadata store handle, safe for concurrent use.
    pub store: Arc<dyn WarehouseStore>,
    /// In-progress / last-exec / recovery bookkeeping.
    pub registry: Arc<SyncRegistry>,
    /// Per-destination workers under the global cap.
    pub workers: Arc<WorkerPool>,
    /// Warehouse driver registry.
    pub managers: Arc<ManagerRegistry>,
    /// Shared pub/sub handle.
    pub notifier: Arc<dyn Notifier>,
    /// Backend-config snapshot feed.
    pub feed: ConfigFeed,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("managers", &self.managers)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wires up the shared state from its external collaborators.
    #[must_use]
    pub fn new(
        config: WarehouseConfig,
        store: Arc<dyn WarehouseStore>,
        managers: Arc<ManagerRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let registry = Arc::new(SyncRegistry::new());
        let workers = WorkerPool::new(
            config.no_of_workers,
            config.worker_retry_sleep(),
            Arc::clone(&registry),
            Arc::clone(&managers),
        );
        Arc::new(Self {
            config,
            store,
            registry,
            workers,
            managers,
            notifier,
            feed: ConfigFeed::new(),
        })
    }

    /// The fresh-upload admission gate derived from configuration.
    #[must_use]
    pub fn frequency_gate(&self) -> FrequencyGate {
        FrequencyGate {
            default_freq_secs: self.config.upload_freq_secs,
            ignore: self.config.warehouse_sync_freq_ignore,
        }
    }

    /// The pending-upload admission gate derived from configuration.
    #[must_use]
    pub fn retry_gate(&self) -> RetryGate {
        RetryGate {
            min_retry_attempts: self.config.min_retry_attempts,
            retry_time_window: self.config.retry_time_window(),
        }
    }

    /// Starts the router supervisor on the config feed and returns it.
    #[must_use]
    pub fn start(self: &Arc<Self>) -> Arc<RouterSupervisor> {
        let supervisor = RouterSupervisor::new(Arc::clone(self));
        let task = Arc::clone(&supervisor);
        let rx = self.feed.subscribe();
        tokio::spawn(async move {
            task.run(rx).await;
        });
        supervisor
    }
}
