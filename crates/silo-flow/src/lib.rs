//! Upload scheduling and orchestration core for the Silo warehouse service.
//!
//! Customer event data lands in object storage as *staging files*,
//! referenced by rows in a metadata database. This crate owns the layer
//! that drives those rows to the destination warehouses:
//!
//! - [`store`]: the persisted staging-file / upload state (Postgres, plus
//!   an in-memory implementation for tests)
//! - [`registry`]: the process-wide in-progress / last-exec / recovery maps
//! - [`gates`]: frequency and retry admission predicates
//! - [`worker`]: per-destination workers under a global concurrency cap
//! - [`router`]: one scheduler instance per warehouse kind
//! - [`supervisor`]: creates and enables/disables routers from the
//!   backend-config feed
//! - [`manager`]: the typed facade over destination-specific drivers
//! - [`notifier`]: Postgres pub/sub used to fan out staging-file parsing
//!
//! Warehouse drivers, the staging-file format translation, and the parsing
//! slave pool are external collaborators consumed through the [`manager`],
//! [`store`], and [`notifier`] traits.

pub mod backend_config;
pub mod binding;
pub mod error;
pub mod gates;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod notifier;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod store;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
