//! Observability infrastructure for Silo.
//!
//! Structured logging with consistent spans across all warehouse
//! components. Initialization is idempotent so embedded deployments can
//! call it alongside the host process.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Reads the log format from `SILO_LOG_FORMAT` (`json` or `pretty`).
#[must_use]
pub fn log_format_from_env() -> LogFormat {
    match std::env::var("SILO_LOG_FORMAT") {
        Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

/// Initializes the logging subsystem.
///
/// Call once at startup. Safe to call multiple times; subsequent calls are
/// no-ops. Log levels come from `RUST_LOG` (default `info`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for router operations with standard fields.
#[must_use]
pub fn router_span(operation: &str, dest_type: &str) -> Span {
    tracing::info_span!("router", op = operation, dest_type = dest_type)
}

/// Creates a span for upload operations.
#[must_use]
pub fn upload_span(operation: &str, upload_id: i64, source: &str, destination: &str) -> Span {
    tracing::info_span!(
        "upload",
        op = operation,
        upload_id = upload_id,
        source = source,
        destination = destination,
    )
}
