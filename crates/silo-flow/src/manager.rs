//! Typed facade over destination-specific warehouse drivers.
//!
//! Driver implementations (schema creation, COPY/merge SQL, identity
//! tables) live outside this crate; the scheduler only needs the
//! capability set below. Selection is by destination kind; an upload for
//! a kind with no registered driver fails as fatal.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::binding::{DestinationKind, WarehouseBinding};
use crate::error::{Error, Result};
use crate::model::UploadJob;

/// The capability set the scheduler requires from a warehouse driver.
#[async_trait]
pub trait WarehouseManager: Send + Sync {
    /// Cleans up destination-side state left by an interrupted export.
    /// Must be idempotent; retried every tick until it succeeds.
    async fn crash_recover(&self, binding: &WarehouseBinding) -> Result<()>;

    /// Runs the upload pipeline for one job to completion or error.
    async fn run(&self, job: &UploadJob) -> Result<()>;

    /// One-shot connectivity check, fired when a destination requests it.
    async fn test_connection(&self, _binding: &WarehouseBinding) -> Result<()> {
        Ok(())
    }

    /// Sets up identity-resolution side tables for the destination.
    async fn setup_identity_tables(&self, _binding: &WarehouseBinding) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn WarehouseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn WarehouseManager")
    }
}

/// Registry of drivers, keyed by destination kind.
#[derive(Default)]
pub struct ManagerRegistry {
    managers: HashMap<DestinationKind, Arc<dyn WarehouseManager>>,
}

impl ManagerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the driver for a kind.
    pub fn register(&mut self, kind: DestinationKind, manager: Arc<dyn WarehouseManager>) {
        self.managers.insert(kind, manager);
    }

    /// Looks up the driver for a kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDestination`] when no driver is
    /// registered for the kind.
    pub fn get(&self, kind: DestinationKind) -> Result<Arc<dyn WarehouseManager>> {
        self.managers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::UnsupportedDestination {
                dest_type: kind.as_str().to_string(),
            })
    }

    /// True when a driver is registered for the kind.
    #[must_use]
    pub fn supports(&self, kind: DestinationKind) -> bool {
        self.managers.contains_key(&kind)
    }
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<&str> = self.managers.keys().map(|k| k.as_str()).collect();
        f.debug_struct("ManagerRegistry").field("kinds", &kinds).finish()
    }
}
