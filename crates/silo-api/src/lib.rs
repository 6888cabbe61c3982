//! HTTP surface for the Silo warehouse service.
//!
//! Two endpoints, registered by deployment mode: `POST /v1/process`
//! accepts staging-file registrations (master-ish modes) and
//! `GET /health` reports service health (stand-alone modes).

pub mod error;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{app, AppState};
