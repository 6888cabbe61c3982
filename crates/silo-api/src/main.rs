//! The `silo-warehouse` service binary.
//!
//! Wires configuration, the metadata database, the pub/sub notifier, and
//! the scheduler together, then serves the HTTP surface. Warehouse
//! drivers register into the [`ManagerRegistry`] at wiring time; a build
//! without drivers still schedules and fails uploads as unsupported.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use silo_api::{app, AppState};
use silo_core::observability::{init_logging, log_format_from_env};
use silo_core::WarehouseConfig;
use silo_flow::manager::ManagerRegistry;
use silo_flow::notifier::{Notifier, PgNotifier, STAGING_FILE_PROCESS_TOPIC};
use silo_flow::store::postgres::{run_migrations, PgWarehouseStore};
use silo_flow::Orchestrator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(log_format_from_env());

    let config = WarehouseConfig::from_env()?;
    tracing::info!(mode = %config.mode, port = config.web_port, "starting warehouse service");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.db.connection_url())
        .await?;

    // Migration failures are structural; let them take the process down.
    run_migrations(&pool).await?;

    let store = Arc::new(PgWarehouseStore::new(pool.clone()));
    let notifier = Arc::new(PgNotifier::new(pool));
    // Driver crates for the supported warehouse kinds register here; the
    // scheduler core ships without any.
    let managers = Arc::new(ManagerRegistry::new());

    let orch = Orchestrator::new(
        config.clone(),
        Arc::clone(&store) as _,
        managers,
        Arc::clone(&notifier) as _,
    );

    if config.mode.is_master() {
        notifier.register_topic(STAGING_FILE_PROCESS_TOPIC).await?;
        // The control-plane poller (external) publishes snapshots into
        // `orch.feed`; the supervisor reconciles routers from them.
        let _supervisor = orch.start();
        tracing::info!("warehouse master started");
    }

    if config.mode.is_slave() {
        tracing::info!(
            routines = config.no_of_slave_worker_routines,
            topic = STAGING_FILE_PROCESS_TOPIC,
            "slave parsing pool listens out of process"
        );
    }

    let state = AppState::new(
        Arc::clone(&store) as _,
        Arc::clone(&orch.workers),
        config.mode,
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], config.web_port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "warehouse HTTP surface listening");
    axum::serve(listener, app(state)).await?;

    Ok(())
}
