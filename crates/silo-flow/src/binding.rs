//! Warehouse kinds and resolved (source, destination) bindings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::registry::PairKey;

/// The warehouse destination kinds a router can be spun up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationKind {
    /// Amazon Redshift.
    Redshift,
    /// Google BigQuery.
    BigQuery,
    /// Snowflake.
    Snowflake,
    /// Postgres.
    Postgres,
    /// ClickHouse.
    ClickHouse,
}

/// All kinds the supervisor will create routers for.
pub const WAREHOUSE_DESTINATIONS: [DestinationKind; 5] = [
    DestinationKind::Redshift,
    DestinationKind::BigQuery,
    DestinationKind::Snowflake,
    DestinationKind::Postgres,
    DestinationKind::ClickHouse,
];

/// Kinds whose drivers require crash recovery after an interrupted export.
pub const CRASH_RECOVER_DESTINATIONS: [DestinationKind; 1] = [DestinationKind::Redshift];

impl DestinationKind {
    /// Wire name used in config feeds and the `destination_type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redshift => "RS",
            Self::BigQuery => "BQ",
            Self::Snowflake => "SNOWFLAKE",
            Self::Postgres => "POSTGRES",
            Self::ClickHouse => "CLICKHOUSE",
        }
    }

    /// Load-file format the destination ingests.
    #[must_use]
    pub const fn load_file_format(self) -> &'static str {
        match self {
            Self::BigQuery => "json",
            _ => "csv",
        }
    }

    /// True when the kind participates in crash recovery at startup.
    #[must_use]
    pub fn crash_recover_enabled(self) -> bool {
        CRASH_RECOVER_DESTINATIONS.contains(&self)
    }

    /// True when the kind supports identity-resolution side tables.
    #[must_use]
    pub const fn identity_enabled(self) -> bool {
        matches!(self, Self::BigQuery | Self::Snowflake)
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS" => Ok(Self::Redshift),
            "BQ" => Ok(Self::BigQuery),
            "SNOWFLAKE" => Ok(Self::Snowflake),
            "POSTGRES" => Ok(Self::Postgres),
            "CLICKHOUSE" => Ok(Self::ClickHouse),
            other => Err(Error::InvalidConfig {
                message: format!("unknown destination type: {other}"),
            }),
        }
    }
}

/// A resolved route from one source to one destination warehouse.
///
/// Derived from a config snapshot; carries everything the scheduler needs
/// to discover, group, and dispatch that pair's staging files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseBinding {
    /// Source id.
    pub source_id: String,
    /// Human-readable source name (namespace fallback).
    pub source_name: String,
    /// Destination id.
    pub destination_id: String,
    /// Whether the destination is currently enabled.
    pub destination_enabled: bool,
    /// Warehouse kind.
    pub destination_type: DestinationKind,
    /// Resolved destination-side schema/database name.
    pub namespace: String,
    /// Raw destination config from the snapshot.
    pub config: Value,
}

impl WarehouseBinding {
    /// The in-progress / last-exec key for this pair.
    #[must_use]
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.source_id, &self.destination_id)
    }

    /// The worker serialisation unit: `<destinationID>_<namespace>`.
    ///
    /// Unique per warehouse instance, not per source; all sources feeding
    /// one destination share a worker.
    #[must_use]
    pub fn worker_identity(&self) -> String {
        format!("{}_{}", self.destination_id, self.namespace)
    }

    /// Per-destination sync frequency in minutes, when configured.
    ///
    /// Unparseable values are ignored and fall back to the global default.
    #[must_use]
    pub fn sync_frequency_mins(&self) -> Option<i64> {
        self.config
            .get("syncFrequency")
            .and_then(Value::as_str)
            .and_then(|s| s.trim().parse::<i64>().ok())
    }

    /// True when the destination asked for live upload-status syncs.
    #[must_use]
    pub fn event_delivery_enabled(&self) -> bool {
        self.config.get("eventDelivery").and_then(Value::as_bool) == Some(true)
    }

    /// True when the destination asked for a one-shot connection test.
    #[must_use]
    pub fn test_connection_requested(&self) -> bool {
        self.config.get("testConnection").and_then(Value::as_bool) == Some(true)
    }
}

/// Resolves the namespace for a destination.
///
/// Resolution order:
/// 1. explicit `namespace` in the destination config (sanitised);
/// 2. the namespace recorded by a prior upload for the same pair;
/// 3. the sanitised source name.
///
/// ClickHouse is special-cased: its `database` config value is used
/// verbatim and is required.
///
/// # Errors
///
/// Returns an error for a ClickHouse destination without a `database`.
pub fn resolve_namespace(
    kind: DestinationKind,
    dest_config: &Value,
    prior: Option<String>,
    source_name: &str,
) -> Result<String, Error> {
    if kind == DestinationKind::ClickHouse {
        return dest_config
            .get("database")
            .and_then(Value::as_str)
            .filter(|db| !db.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidConfig {
                message: "CLICKHOUSE destination config is missing `database`".to_string(),
            });
    }

    if let Some(explicit) = dest_config.get("namespace").and_then(Value::as_str) {
        if !explicit.trim().is_empty() {
            return Ok(to_provider_case(kind, &to_safe_namespace(explicit)));
        }
    }

    if let Some(prior) = prior {
        return Ok(prior);
    }

    Ok(to_provider_case(kind, &to_safe_namespace(source_name)))
}

/// Sanitises a raw name into a warehouse-safe namespace: lowercase, runs
/// of non-alphanumeric characters collapse to `_`, and a leading digit
/// gets a `_` prefix.
#[must_use]
pub fn to_safe_namespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_underscore = false;
        } else if !last_was_underscore && !out.is_empty() {
            out.push('_');
            last_was_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        return "stringempty".to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Applies the destination's identifier case convention.
#[must_use]
pub fn to_provider_case(kind: DestinationKind, namespace: &str) -> String {
    match kind {
        DestinationKind::Snowflake => namespace.to_ascii_uppercase(),
        _ => namespace.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binding(config: Value) -> WarehouseBinding {
        WarehouseBinding {
            source_id: "src-1".to_string(),
            source_name: "My Source".to_string(),
            destination_id: "dst-1".to_string(),
            destination_enabled: true,
            destination_type: DestinationKind::Postgres,
            namespace: "my_source".to_string(),
            config,
        }
    }

    #[test]
    fn kind_round_trips() {
        for kind in WAREHOUSE_DESTINATIONS {
            assert_eq!(kind.as_str().parse::<DestinationKind>().unwrap(), kind);
        }
        assert!("VERTICA".parse::<DestinationKind>().is_err());
    }

    #[test]
    fn load_file_formats() {
        assert_eq!(DestinationKind::BigQuery.load_file_format(), "json");
        assert_eq!(DestinationKind::Redshift.load_file_format(), "csv");
        assert_eq!(DestinationKind::ClickHouse.load_file_format(), "csv");
    }

    #[test]
    fn only_redshift_crash_recovers() {
        assert!(DestinationKind::Redshift.crash_recover_enabled());
        assert!(!DestinationKind::Postgres.crash_recover_enabled());
    }

    #[test]
    fn worker_identity_is_dest_and_namespace() {
        let b = binding(json!({}));
        assert_eq!(b.worker_identity(), "dst-1_my_source");
    }

    #[test]
    fn sync_frequency_parses_minutes() {
        assert_eq!(binding(json!({"syncFrequency": "30"})).sync_frequency_mins(), Some(30));
        assert_eq!(binding(json!({"syncFrequency": "soon"})).sync_frequency_mins(), None);
        assert_eq!(binding(json!({})).sync_frequency_mins(), None);
    }

    #[test]
    fn one_shot_flags() {
        let b = binding(json!({"eventDelivery": true, "testConnection": true}));
        assert!(b.event_delivery_enabled());
        assert!(b.test_connection_requested());
        let b = binding(json!({"eventDelivery": "yes"}));
        assert!(!b.event_delivery_enabled());
    }

    #[test]
    fn explicit_namespace_wins_and_is_sanitised() {
        let ns = resolve_namespace(
            DestinationKind::Postgres,
            &json!({"namespace": "Prod Events!"}),
            Some("prior_ns".to_string()),
            "ignored",
        )
        .unwrap();
        assert_eq!(ns, "prod_events");
    }

    #[test]
    fn prior_namespace_beats_source_name() {
        let ns = resolve_namespace(
            DestinationKind::Postgres,
            &json!({}),
            Some("recorded".to_string()),
            "My Source",
        )
        .unwrap();
        assert_eq!(ns, "recorded");
    }

    #[test]
    fn source_name_is_the_fallback() {
        let ns = resolve_namespace(DestinationKind::Postgres, &json!({}), None, "My Source").unwrap();
        assert_eq!(ns, "my_source");
    }

    #[test]
    fn snowflake_namespaces_are_uppercased() {
        let ns = resolve_namespace(DestinationKind::Snowflake, &json!({}), None, "My Source").unwrap();
        assert_eq!(ns, "MY_SOURCE");
    }

    #[test]
    fn clickhouse_uses_database_verbatim() {
        let ns = resolve_namespace(
            DestinationKind::ClickHouse,
            &json!({"database": "Events_DB"}),
            None,
            "src",
        )
        .unwrap();
        assert_eq!(ns, "Events_DB");
    }

    #[test]
    fn clickhouse_without_database_is_an_error() {
        let err = resolve_namespace(DestinationKind::ClickHouse, &json!({}), None, "src");
        assert!(err.is_err());
    }

    #[test]
    fn safe_namespace_rules() {
        assert_eq!(to_safe_namespace("My Source"), "my_source");
        assert_eq!(to_safe_namespace("99 reds"), "_99_reds");
        assert_eq!(to_safe_namespace("a--b__c"), "a_b_c");
        assert_eq!(to_safe_namespace("trailing!!"), "trailing");
        assert_eq!(to_safe_namespace("!!"), "stringempty");
    }
}
