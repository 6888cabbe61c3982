//! Shared foundation for the Silo warehouse service.
//!
//! This crate holds the pieces every other Silo crate depends on:
//!
//! - [`error`]: the shared error type and result alias
//! - [`config`]: runtime configuration loaded from the environment
//! - [`mode`]: the warehouse deployment mode (master/slave/embedded)
//! - [`observability`]: tracing initialization helpers

pub mod config;
pub mod error;
pub mod mode;
pub mod observability;

pub use config::{DbConfig, WarehouseConfig};
pub use error::{Error, Result};
pub use mode::WarehouseMode;
