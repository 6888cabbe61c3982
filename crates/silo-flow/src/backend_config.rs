//! Backend-config snapshots and the broadcast feed.
//!
//! The control plane streams full config snapshots; each one completely
//! replaces the prior view. The feed is a `watch` channel of immutable
//! snapshots so every consumer (supervisor, routers) keeps its own
//! latest-snapshot view without shared mutation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

/// One full view of configured sources and destinations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigSnapshot {
    /// All configured sources.
    pub sources: Vec<SourceConfig>,
}

/// A configured event source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceConfig {
    /// Source id.
    #[serde(rename = "ID")]
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Destinations attached to the source.
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

/// A configured destination under a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DestinationConfig {
    /// Destination id.
    #[serde(rename = "ID")]
    pub id: String,
    /// Whether the destination is enabled.
    pub enabled: bool,
    /// Destination-specific config blob.
    #[serde(default)]
    pub config: Value,
    /// Definition metadata (carries the warehouse kind name).
    pub destination_definition: DestinationDefinition,
}

/// Destination definition metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DestinationDefinition {
    /// Definition name; for warehouses this is the kind (`RS`, `BQ`, ...).
    pub name: String,
}

impl ConfigSnapshot {
    /// Definition names of every destination in the snapshot.
    #[must_use]
    pub fn destination_definition_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .sources
            .iter()
            .flat_map(|s| &s.destinations)
            .map(|d| d.destination_definition.name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Broadcast source of config snapshots.
///
/// Cloning the feed shares the underlying channel; `subscribe` hands out
/// an independent receiver that always sees the latest snapshot.
#[derive(Debug, Clone)]
pub struct ConfigFeed {
    sender: Arc<watch::Sender<Arc<ConfigSnapshot>>>,
}

impl Default for ConfigFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigFeed {
    /// Creates a feed with an empty initial snapshot.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Arc::new(ConfigSnapshot::default()));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes a new snapshot, replacing the prior view for all
    /// subscribers.
    pub fn publish(&self, snapshot: ConfigSnapshot) {
        // send_replace never fails: the sender keeps the channel open even
        // with zero receivers.
        self.sender.send_replace(Arc::new(snapshot));
    }

    /// Subscribes to the feed; the receiver starts at the latest snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.sender.subscribe()
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn latest(&self) -> Arc<ConfigSnapshot> {
        self.sender.borrow().clone()
    }
}
