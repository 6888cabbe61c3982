//! Frequency and retry admission gates.
//!
//! Both gates are pure predicates over persisted and in-memory state; the
//! caller passes `now` explicitly and performs the only side effect
//! (recording last-exec) itself, before the run starts.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::PendingUpload;

/// Admission control for fresh uploads: a pair may start a run only when
/// enough time has passed since its last start.
#[derive(Debug, Clone, Copy)]
pub struct FrequencyGate {
    /// Default minimum seconds between run starts for a pair.
    pub default_freq_secs: u64,
    /// Bypass the gate entirely.
    pub ignore: bool,
}

impl FrequencyGate {
    /// Decides whether a pair may start a fresh upload run.
    ///
    /// `sync_freq_mins` is the destination's configured sync frequency;
    /// when absent the global default applies. `last_exec_unix` is when
    /// the pair last *started* a run.
    #[must_use]
    pub fn may_start(
        &self,
        last_exec_unix: Option<i64>,
        sync_freq_mins: Option<i64>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.ignore {
            return true;
        }
        let Some(last_exec) = last_exec_unix else {
            return true;
        };
        let freq_secs = sync_freq_mins
            .map(|mins| mins * 60)
            .unwrap_or_else(|| i64::try_from(self.default_freq_secs).unwrap_or(i64::MAX));
        now.timestamp() - last_exec >= freq_secs
    }
}

/// Admission control for pending (already-persisted, non-terminal)
/// uploads.
///
/// An upload is retried while its attempt count stays below the minimum
/// OR the wall clock is still inside the retry window measured from the
/// first attempt. Once both budgets are spent the upload stays dormant in
/// its failed non-terminal state for operator intervention; this gate
/// never aborts it.
#[derive(Debug, Clone, Copy)]
pub struct RetryGate {
    /// Attempt budget.
    pub min_retry_attempts: i64,
    /// Wall-clock budget measured from the first recorded attempt.
    pub retry_time_window: Duration,
}

impl RetryGate {
    /// Decides whether a pending upload may be re-enqueued.
    #[must_use]
    pub fn may_start(&self, pending: &PendingUpload, now: DateTime<Utc>) -> bool {
        if pending.attempts < self.min_retry_attempts {
            return true;
        }
        let Some(first_attempt_at) = pending.first_attempt_at else {
            // No attempt recorded yet (fresh Waiting row): always admit.
            return true;
        };
        let window = chrono::Duration::from_std(self.retry_time_window)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        now - first_attempt_at < window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Upload, UploadState};
    use serde_json::json;

    fn gate() -> RetryGate {
        RetryGate {
            min_retry_attempts: 3,
            retry_time_window: Duration::from_secs(3 * 60 * 60),
        }
    }

    fn pending(attempts: i64, first_attempt_at: Option<DateTime<Utc>>) -> PendingUpload {
        let timings = first_attempt_at.map_or_else(
            || json!([]),
            |at| json!([{"exporting_data_failed": at.to_rfc3339()}]),
        );
        let upload = Upload {
            id: 7,
            source_id: "src-1".to_string(),
            namespace: "ns".to_string(),
            destination_id: "dst-1".to_string(),
            destination_type: "RS".to_string(),
            start_staging_file_id: 1,
            end_staging_file_id: 10,
            start_load_file_id: 0,
            end_load_file_id: 0,
            status: UploadState::ExportingDataFailed,
            schema: json!({}),
            error: json!({"exporting_data_failed": {"attempt": attempts}}),
            timings,
            first_event_at: None,
            last_event_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        PendingUpload::from(upload)
    }

    #[test]
    fn frequency_gate_blocks_inside_window() {
        let gate = FrequencyGate {
            default_freq_secs: 60,
            ignore: false,
        };
        let now = Utc::now();
        let last = now.timestamp() - 30;
        assert!(!gate.may_start(Some(last), None, now));
    }

    #[test]
    fn frequency_gate_admits_after_window() {
        let gate = FrequencyGate {
            default_freq_secs: 60,
            ignore: false,
        };
        let now = Utc::now();
        assert!(gate.may_start(Some(now.timestamp() - 61), None, now));
    }

    #[test]
    fn frequency_gate_admits_first_run() {
        let gate = FrequencyGate {
            default_freq_secs: 1800,
            ignore: false,
        };
        assert!(gate.may_start(None, None, Utc::now()));
    }

    #[test]
    fn destination_sync_frequency_overrides_default() {
        let gate = FrequencyGate {
            default_freq_secs: 1800,
            ignore: false,
        };
        let now = Utc::now();
        let last = now.timestamp() - 120;
        // 1 minute configured: 120s ago is past the window.
        assert!(gate.may_start(Some(last), Some(1), now));
        // 30 minutes configured: still inside.
        assert!(!gate.may_start(Some(last), Some(30), now));
    }

    #[test]
    fn ignore_flag_bypasses_gate() {
        let gate = FrequencyGate {
            default_freq_secs: 1800,
            ignore: true,
        };
        let now = Utc::now();
        assert!(gate.may_start(Some(now.timestamp()), None, now));
    }

    #[test]
    fn retry_gate_admits_under_attempt_budget() {
        let now = Utc::now();
        let old = now - chrono::Duration::hours(5);
        // 2 attempts < 3: admitted no matter how old the first attempt is.
        assert!(gate().may_start(&pending(2, Some(old)), now));
    }

    #[test]
    fn retry_gate_admits_inside_time_window() {
        let now = Utc::now();
        let recent = now - chrono::Duration::minutes(10);
        // Attempts exhausted but the window is not.
        assert!(gate().may_start(&pending(5, Some(recent)), now));
    }

    #[test]
    fn retry_gate_rejects_when_both_budgets_spent() {
        let now = Utc::now();
        let old = now - chrono::Duration::hours(4);
        assert!(!gate().may_start(&pending(5, Some(old)), now));
    }

    #[test]
    fn retry_gate_admits_upload_without_attempts() {
        let now = Utc::now();
        assert!(gate().may_start(&pending(5, None), now));
    }
}
