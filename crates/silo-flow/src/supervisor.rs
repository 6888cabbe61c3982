//! Creates, enables, and disables routers from the config feed.
//!
//! The supervisor watches the same snapshot stream the routers do. A
//! warehouse kind appearing for the first time gets a fresh router
//! (setup, recovery seeding, task spawn); a kind that disappears is
//! disabled, never stopped mid-run; a returning kind is re-enabled.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::backend_config::ConfigSnapshot;
use crate::binding::{DestinationKind, WAREHOUSE_DESTINATIONS};
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::router::Router;

/// Watches the config feed and reconciles the router set against it.
pub struct RouterSupervisor {
    orch: Arc<Orchestrator>,
    routers: Mutex<HashMap<DestinationKind, Arc<Router>>>,
}

impl std::fmt::Debug for RouterSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterSupervisor").finish_non_exhaustive()
    }
}

impl RouterSupervisor {
    /// Creates a supervisor with no routers yet.
    #[must_use]
    pub fn new(orch: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            orch,
            routers: Mutex::new(HashMap::new()),
        })
    }

    /// Follows the feed, reconciling on every snapshot. Runs until the
    /// feed is dropped. Router setup failures are fatal: they mean the
    /// metadata store cannot be read at all.
    pub async fn run(self: Arc<Self>, mut rx: watch::Receiver<Arc<ConfigSnapshot>>) {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if let Err(err) = self.reconcile(&snapshot).await {
                tracing::error!(error = %err, "router setup failed; aborting process");
                std::process::exit(1);
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Applies one snapshot: spins up routers for newly seen warehouse
    /// kinds, re-enables returning kinds, disables absent ones.
    ///
    /// # Errors
    ///
    /// Returns a storage error when a new router's setup fails.
    pub async fn reconcile(&self, snapshot: &ConfigSnapshot) -> Result<()> {
        let mut enabled_kinds = Vec::new();
        for name in snapshot.destination_definition_names() {
            if let Ok(kind) = DestinationKind::from_str(name) {
                if WAREHOUSE_DESTINATIONS.contains(&kind) {
                    enabled_kinds.push(kind);
                }
            }
        }

        let mut routers = self.routers.lock().await;
        for kind in &enabled_kinds {
            if let Some(router) = routers.get(kind) {
                if !router.is_enabled() {
                    tracing::info!(dest_type = kind.as_str(), "re-enabling warehouse router");
                    router.enable();
                }
            } else {
                tracing::info!(dest_type = kind.as_str(), "starting new warehouse router");
                let router = Router::setup(*kind, Arc::clone(&self.orch)).await?;
                routers.insert(*kind, router);
            }
        }

        for (kind, router) in routers.iter() {
            if !enabled_kinds.contains(kind) && router.is_enabled() {
                tracing::info!(dest_type = kind.as_str(), "disabling warehouse router");
                router.disable();
            }
        }

        Ok(())
    }

    /// The router for a kind, if one has been created.
    pub async fn router(&self, kind: DestinationKind) -> Option<Arc<Router>> {
        self.routers.lock().await.get(&kind).cloned()
    }

    /// Number of routers created so far (enabled or not).
    pub async fn router_count(&self) -> usize {
        self.routers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use silo_core::WarehouseConfig;

    use crate::manager::ManagerRegistry;
    use crate::notifier::MemoryNotifier;
    use crate::store::memory::MemoryWarehouseStore;
    use crate::testing::{test_destination, test_snapshot, MockManager};

    fn orchestrator() -> Arc<Orchestrator> {
        let mut managers = ManagerRegistry::new();
        managers.register(DestinationKind::Postgres, Arc::new(MockManager::new()));
        managers.register(DestinationKind::Redshift, Arc::new(MockManager::new()));
        Orchestrator::new(
            WarehouseConfig::default(),
            Arc::new(MemoryWarehouseStore::new()),
            Arc::new(managers),
            Arc::new(MemoryNotifier::new()),
        )
    }

    #[tokio::test]
    async fn new_kind_gets_a_router() {
        let supervisor = RouterSupervisor::new(orchestrator());
        let snapshot = test_snapshot(
            "src-1",
            "Source One",
            vec![test_destination("dst-1", DestinationKind::Postgres, json!({}))],
        );

        supervisor.reconcile(&snapshot).await.unwrap();
        assert_eq!(supervisor.router_count().await, 1);
        let router = supervisor.router(DestinationKind::Postgres).await.unwrap();
        assert!(router.is_enabled());
        assert!(supervisor.router(DestinationKind::BigQuery).await.is_none());
    }

    #[tokio::test]
    async fn absent_kind_is_disabled_not_stopped() {
        let supervisor = RouterSupervisor::new(orchestrator());
        let with_pg = test_snapshot(
            "src-1",
            "Source One",
            vec![test_destination("dst-1", DestinationKind::Postgres, json!({}))],
        );
        supervisor.reconcile(&with_pg).await.unwrap();

        let without_pg = test_snapshot(
            "src-1",
            "Source One",
            vec![test_destination("dst-2", DestinationKind::Redshift, json!({}))],
        );
        supervisor.reconcile(&without_pg).await.unwrap();

        // The Postgres router still exists but is disabled; Redshift got
        // its own router.
        assert_eq!(supervisor.router_count().await, 2);
        let pg = supervisor.router(DestinationKind::Postgres).await.unwrap();
        assert!(!pg.is_enabled());

        // A returning kind is re-enabled on the next snapshot.
        supervisor.reconcile(&with_pg).await.unwrap();
        assert!(pg.is_enabled());
    }

    #[tokio::test]
    async fn non_warehouse_definitions_are_ignored() {
        let supervisor = RouterSupervisor::new(orchestrator());
        let mut snapshot = test_snapshot(
            "src-1",
            "Source One",
            vec![test_destination("dst-1", DestinationKind::Postgres, json!({}))],
        );
        snapshot.sources[0].destinations[0]
            .destination_definition
            .name = "WEBHOOK".to_string();

        supervisor.reconcile(&snapshot).await.unwrap();
        assert_eq!(supervisor.router_count().await, 0);
    }
}
