//! Persisted data model: staging files, uploads, and the upload lifecycle.
//!
//! The scheduler revolves around two metadata tables. `wh_staging_files`
//! rows are written by the HTTP ingress and consumed here read-only;
//! `wh_uploads` rows carry the persistent upload lifecycle. An upload
//! covers an inclusive staging-file id range for one
//! (source, destination) pair.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::binding::WarehouseBinding;
use crate::error::Error;
use crate::notifier::Notifier;

/// Status given to staging files on registration. Later transitions are
/// owned by the parsing slave pool.
pub const STAGING_FILE_WAITING_STATE: &str = "waiting";

/// Lifecycle states of an upload.
///
/// `Waiting → Generating* → Exporting* → ExportedData | Aborted`. The
/// scheduler only distinguishes terminal from non-terminal; the
/// intermediate states belong to the warehouse drivers and are recorded
/// here so pending-upload discovery and crash recovery can reason about
/// them. Wire strings are snake_case for table compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Created by the scheduler, not yet picked up by a driver.
    Waiting,
    /// Driver is generating message UUIDs.
    GeneratingUuids,
    /// UUID generation failed; retryable.
    GeneratingUuidsFailed,
    /// Driver is generating per-table load files.
    GeneratingLoadFiles,
    /// Load-file generation failed; retryable.
    GeneratingLoadFilesFailed,
    /// Driver is populating identity-resolution side tables.
    GeneratingIdentityTables,
    /// Identity-table population failed; retryable.
    GeneratingIdentityTablesFailed,
    /// Driver is applying schema changes to the destination.
    UpdatingSchema,
    /// Schema update failed; retryable.
    UpdatingSchemaFailed,
    /// Driver is copying load files into the destination.
    ExportingData,
    /// Data export failed; retryable, and a crash-recovery trigger.
    ExportingDataFailed,
    /// Terminal success.
    ExportedData,
    /// Terminal failure; never retried.
    Aborted,
}

impl UploadState {
    /// Wire representation stored in `wh_uploads.status`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::GeneratingUuids => "generating_uuids",
            Self::GeneratingUuidsFailed => "generating_uuids_failed",
            Self::GeneratingLoadFiles => "generating_load_files",
            Self::GeneratingLoadFilesFailed => "generating_load_files_failed",
            Self::GeneratingIdentityTables => "generating_identity_tables",
            Self::GeneratingIdentityTablesFailed => "generating_identity_tables_failed",
            Self::UpdatingSchema => "updating_schema",
            Self::UpdatingSchemaFailed => "updating_schema_failed",
            Self::ExportingData => "exporting_data",
            Self::ExportingDataFailed => "exporting_data_failed",
            Self::ExportedData => "exported_data",
            Self::Aborted => "aborted",
        }
    }

    /// True for states that end the upload lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ExportedData | Self::Aborted)
    }

    /// True for the `…Failed` twins.
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(
            self,
            Self::GeneratingUuidsFailed
                | Self::GeneratingLoadFilesFailed
                | Self::GeneratingIdentityTablesFailed
                | Self::UpdatingSchemaFailed
                | Self::ExportingDataFailed
        )
    }

    /// True for states that mark an interrupted export at startup.
    #[must_use]
    pub const fn is_crash_interrupted(self) -> bool {
        matches!(self, Self::ExportingData | Self::ExportingDataFailed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "generating_uuids" => Ok(Self::GeneratingUuids),
            "generating_uuids_failed" => Ok(Self::GeneratingUuidsFailed),
            "generating_load_files" => Ok(Self::GeneratingLoadFiles),
            "generating_load_files_failed" => Ok(Self::GeneratingLoadFilesFailed),
            "generating_identity_tables" => Ok(Self::GeneratingIdentityTables),
            "generating_identity_tables_failed" => Ok(Self::GeneratingIdentityTablesFailed),
            "updating_schema" => Ok(Self::UpdatingSchema),
            "updating_schema_failed" => Ok(Self::UpdatingSchemaFailed),
            "exporting_data" => Ok(Self::ExportingData),
            "exporting_data_failed" => Ok(Self::ExportingDataFailed),
            "exported_data" => Ok(Self::ExportedData),
            "aborted" => Ok(Self::Aborted),
            other => Err(Error::serialization(format!("unknown upload state: {other}"))),
        }
    }
}

/// A staging-file metadata row.
///
/// Immutable after registration except for status annotations made by the
/// parsing pool. Ids are monotonic per table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingFile {
    /// Row id.
    pub id: i64,
    /// Object-storage location of the JSON blob.
    pub location: String,
    /// Originating source id.
    pub source_id: String,
    /// Target destination id.
    pub destination_id: String,
    /// Event schema captured at registration.
    pub schema: Value,
    /// Processing status (owned by the parsing pool after registration).
    pub status: String,
    /// Number of events in the blob.
    pub total_events: i64,
    /// Timestamp of the earliest event, when known.
    pub first_event_at: Option<DateTime<Utc>>,
    /// Timestamp of the latest event, when known.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Row update time.
    pub updated_at: DateTime<Utc>,
}

/// An upload row: the scheduling unit covering a contiguous staging-file
/// id range for one (source, destination) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    /// Row id; also the enqueue-order key.
    pub id: i64,
    /// Originating source id.
    pub source_id: String,
    /// Destination-side schema/database name.
    pub namespace: String,
    /// Target destination id.
    pub destination_id: String,
    /// Warehouse kind (`RS`, `BQ`, ...).
    pub destination_type: String,
    /// First staging-file id covered (inclusive).
    pub start_staging_file_id: i64,
    /// Last staging-file id covered (inclusive).
    pub end_staging_file_id: i64,
    /// First load-file id produced, once known.
    pub start_load_file_id: i64,
    /// Last load-file id produced, once known.
    pub end_load_file_id: i64,
    /// Current lifecycle state.
    pub status: UploadState,
    /// Merged upload schema (driver-owned).
    pub schema: Value,
    /// Per-step error map: state name → `{attempt, errors, ...}`.
    pub error: Value,
    /// Ordered array of `{state: timestamp}` transition records.
    pub timings: Value,
    /// Earliest event covered, when known.
    pub first_event_at: Option<DateTime<Utc>>,
    /// Latest event covered, when known.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Row update time.
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    /// First transition timestamp recorded in `timings`, if any.
    #[must_use]
    pub fn first_attempt_at(&self) -> Option<DateTime<Utc>> {
        first_timing(&self.timings).map(|(_, at)| at)
    }

    /// Last transition recorded in `timings`, if any.
    #[must_use]
    pub fn last_timing(&self) -> Option<(String, DateTime<Utc>)> {
        last_timing(&self.timings)
    }

    /// Attempt counter for the most recent state, from the `error` map.
    #[must_use]
    pub fn attempts(&self) -> i64 {
        let Some((state, _)) = self.last_timing() else {
            return 0;
        };
        self.error
            .get(&state)
            .and_then(|step| step.get("attempt"))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }
}

/// A non-terminal upload as discovered by the main loop, with the retry
/// bookkeeping already extracted from its `timings` and `error` JSON.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    /// The persisted upload row.
    pub upload: Upload,
    /// Attempt count for the last recorded state.
    pub attempts: i64,
    /// Timestamp of the first recorded transition.
    pub first_attempt_at: Option<DateTime<Utc>>,
    /// Timestamp of the last recorded transition.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl From<Upload> for PendingUpload {
    fn from(upload: Upload) -> Self {
        let attempts = upload.attempts();
        let first_attempt_at = upload.first_attempt_at();
        let last_attempt_at = upload.last_timing().map(|(_, at)| at);
        Self {
            upload,
            attempts,
            first_attempt_at,
            last_attempt_at,
        }
    }
}

/// A unit of work handed to a worker: one upload plus its staging files
/// and the shared handles the driver pipeline needs.
#[derive(Clone)]
pub struct UploadJob {
    /// The upload row being driven.
    pub upload: Upload,
    /// Staging files covered by the upload, id-ascending.
    pub staging_files: Vec<StagingFile>,
    /// The resolved binding the upload belongs to.
    pub binding: WarehouseBinding,
    /// Shared pub/sub handle for fanning out staging-file parsing.
    pub notifier: Arc<dyn Notifier>,
}

impl fmt::Debug for UploadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadJob")
            .field("upload_id", &self.upload.id)
            .field("staging_files", &self.staging_files.len())
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

fn timing_entry(entry: &Value) -> Option<(String, DateTime<Utc>)> {
    let map = entry.as_object()?;
    let (state, raw) = map.iter().next()?;
    let at = raw
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?;
    Some((state.clone(), at.with_timezone(&Utc)))
}

fn first_timing(timings: &Value) -> Option<(String, DateTime<Utc>)> {
    timings.as_array()?.first().and_then(timing_entry)
}

fn last_timing(timings: &Value) -> Option<(String, DateTime<Utc>)> {
    timings.as_array()?.last().and_then(timing_entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upload_with(timings: Value, error: Value) -> Upload {
        Upload {
            id: 1,
            source_id: "src-1".to_string(),
            namespace: "analytics".to_string(),
            destination_id: "dst-1".to_string(),
            destination_type: "RS".to_string(),
            start_staging_file_id: 1,
            end_staging_file_id: 3,
            start_load_file_id: 0,
            end_load_file_id: 0,
            status: UploadState::ExportingDataFailed,
            schema: json!({}),
            error,
            timings,
            first_event_at: None,
            last_event_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn state_round_trips_through_wire_string() {
        for state in [
            UploadState::Waiting,
            UploadState::GeneratingLoadFiles,
            UploadState::ExportingDataFailed,
            UploadState::ExportedData,
            UploadState::Aborted,
        ] {
            assert_eq!(state.as_str().parse::<UploadState>().unwrap(), state);
        }
    }

    #[test]
    fn serde_matches_wire_strings() {
        let json = serde_json::to_string(&UploadState::ExportingData).unwrap();
        assert_eq!(json, "\"exporting_data\"");
        let state: UploadState = serde_json::from_str("\"exported_data\"").unwrap();
        assert_eq!(state, UploadState::ExportedData);
    }

    #[test]
    fn only_exported_and_aborted_are_terminal() {
        assert!(UploadState::ExportedData.is_terminal());
        assert!(UploadState::Aborted.is_terminal());
        assert!(!UploadState::Waiting.is_terminal());
        assert!(!UploadState::ExportingDataFailed.is_terminal());
    }

    #[test]
    fn crash_interrupted_states() {
        assert!(UploadState::ExportingData.is_crash_interrupted());
        assert!(UploadState::ExportingDataFailed.is_crash_interrupted());
        assert!(!UploadState::ExportedData.is_crash_interrupted());
        assert!(!UploadState::Waiting.is_crash_interrupted());
    }

    #[test]
    fn unknown_state_is_rejected() {
        assert!("exporting".parse::<UploadState>().is_err());
    }

    #[test]
    fn timings_extraction() {
        let upload = upload_with(
            json!([
                {"exporting_data": "2026-08-01T10:00:00Z"},
                {"exporting_data_failed": "2026-08-01T10:05:00Z"}
            ]),
            json!({"exporting_data_failed": {"attempt": 4}}),
        );

        let first = upload.first_attempt_at().unwrap();
        assert_eq!(first.to_rfc3339(), "2026-08-01T10:00:00+00:00");

        let (state, at) = upload.last_timing().unwrap();
        assert_eq!(state, "exporting_data_failed");
        assert_eq!(at.to_rfc3339(), "2026-08-01T10:05:00+00:00");

        assert_eq!(upload.attempts(), 4);
    }

    #[test]
    fn empty_timings_mean_no_attempts() {
        let upload = upload_with(json!([]), json!({}));
        assert!(upload.first_attempt_at().is_none());
        assert!(upload.last_timing().is_none());
        assert_eq!(upload.attempts(), 0);
    }

    #[test]
    fn attempts_default_to_zero_without_error_entry() {
        let upload = upload_with(
            json!([{"generating_load_files": "2026-08-01T10:00:00Z"}]),
            json!({}),
        );
        assert_eq!(upload.attempts(), 0);
    }

    #[test]
    fn pending_upload_extracts_bookkeeping() {
        let upload = upload_with(
            json!([
                {"exporting_data": "2026-08-01T10:00:00Z"},
                {"exporting_data_failed": "2026-08-01T11:00:00Z"}
            ]),
            json!({"exporting_data_failed": {"attempt": 2}}),
        );
        let pending = PendingUpload::from(upload);
        assert_eq!(pending.attempts, 2);
        assert!(pending.first_attempt_at.is_some());
        assert!(pending.last_attempt_at > pending.first_attempt_at);
    }
}
