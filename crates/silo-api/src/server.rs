//! Ingress and health handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use silo_core::WarehouseMode;
use silo_flow::store::{StagingFileDescriptor, WarehouseStore};
use silo_flow::worker::WorkerPool;

use crate::error::{ApiError, ApiResult};

/// Counter: staging-file registrations that failed at the store.
pub const INGRESS_FAILURES_TOTAL: &str = "silo_wh_ingress_failures_total";

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn WarehouseStore>,
    workers: Arc<WorkerPool>,
    mode: WarehouseMode,
}

impl AppState {
    /// Creates new application state.
    #[must_use]
    pub fn new(store: Arc<dyn WarehouseStore>, workers: Arc<WorkerPool>, mode: WarehouseMode) -> Self {
        Self {
            store,
            workers,
            mode,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// A staging-file registration request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    /// Object-storage location of the landed JSON blob.
    pub location: String,
    /// Event schema captured by the batcher.
    #[serde(default = "empty_schema")]
    pub schema: Value,
    /// Source id.
    pub source: String,
    /// Destination id.
    pub destination: String,
    /// Earliest event timestamp; empty strings count as absent.
    #[serde(default, deserialize_with = "rfc3339_or_empty")]
    pub first_event_at: Option<DateTime<Utc>>,
    /// Latest event timestamp; empty strings count as absent.
    #[serde(default, deserialize_with = "rfc3339_or_empty")]
    pub last_event_at: Option<DateTime<Utc>>,
    /// Number of events in the blob.
    #[serde(default)]
    pub total_events: i64,
}

fn empty_schema() -> Value {
    Value::Object(serde_json::Map::new())
}

fn rfc3339_or_empty<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

/// Health report, one JSON document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `UP` when the process can answer at all.
    pub server: &'static str,
    /// Metadata-DB reachability.
    pub db: &'static str,
    /// Whether the ingress accepts registrations.
    pub accepting_events: &'static str,
    /// Deployment mode, upper-cased.
    pub warehouse_mode: String,
    /// Upload batches currently holding a worker slot.
    pub active_workers: usize,
}

/// Builds the HTTP router for the given mode.
///
/// Master-ish modes register the staging-file ingress; only stand-alone
/// deployments own `/health` (embedded processes report health through
/// their host).
#[must_use]
pub fn app(state: AppState) -> Router {
    let mut router = Router::new();
    if state.mode.is_master() {
        router = router.route("/v1/process", post(process_handler));
    }
    if state.mode.is_standalone() {
        router = router.route("/health", get(health_handler));
    }
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn process_handler(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> ApiResult<StatusCode> {
    let descriptor = StagingFileDescriptor {
        location: request.location,
        schema: request.schema,
        source_id: request.source,
        destination_id: request.destination,
        total_events: request.total_events,
        first_event_at: request.first_event_at,
        last_event_at: request.last_event_at,
    };

    match state.store.insert_staging_file(&descriptor).await {
        Ok(id) => {
            tracing::debug!(
                staging_file_id = id,
                source = %descriptor.source_id,
                destination = %descriptor.destination_id,
                "registered staging file"
            );
            Ok(StatusCode::OK)
        }
        Err(err) => {
            counter!(INGRESS_FAILURES_TOTAL).increment(1);
            tracing::error!(error = %err, "staging-file registration failed");
            Err(ApiError::from(err))
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = if state.store.ping().await.is_ok() {
        "UP"
    } else {
        "DOWN"
    };
    Json(HealthResponse {
        server: "UP",
        db,
        accepting_events: "TRUE",
        warehouse_mode: state.mode.as_str().to_ascii_uppercase(),
        active_workers: state.workers.active_workers(),
    })
}
