//! Normalized job state and the per-job record kept by the watcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Normalized job state.
///
/// `Unknown → Pending → Running → {Completed, Failed, Timeout}`.
/// `Preempted` is never reported by a scheduler: it is inferred when a job
/// that was seen running is seen pending again (requeued).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Not (yet) reported by the scheduler
    #[default]
    Unknown,
    /// Queued, held or waiting
    Pending,
    /// Currently running
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Killed for exceeding its walltime
    Timeout,
    /// Requeued after running
    Preempted,
}

impl JobState {
    /// Terminal states: the job will not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// The job has not started running (or is waiting to run again).
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Unknown | Self::Pending | Self::Preempted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Preempted => "PREEMPTED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest scheduler record for one concrete job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Normalized state as reported by the scheduler
    pub state: JobState,

    /// Raw status columns, keyed by header name
    pub raw_fields: BTreeMap<String, String>,

    /// When this record was produced
    pub last_refreshed: DateTime<Utc>,

    /// Number of observed running → pending regressions
    pub preemptions: u32,
}

impl JobInfo {
    pub fn new(state: JobState, raw_fields: BTreeMap<String, String>) -> Self {
        Self {
            state,
            raw_fields,
            last_refreshed: Utc::now(),
            preemptions: 0,
        }
    }

    /// Raw value of a status column, matched case-insensitively when there
    /// is no exact match (`Queue` in tables, `queue` in full output).
    pub fn field(&self, name: &str) -> Option<&str> {
        self.raw_fields
            .get(name)
            .or_else(|| {
                self.raw_fields
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_and_waiting() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Timeout.is_terminal());
        assert!(!JobState::Preempted.is_terminal());
        assert!(!JobState::Running.is_terminal());

        assert!(JobState::Preempted.is_waiting());
        assert!(JobState::Unknown.is_waiting());
        assert!(!JobState::Running.is_waiting());
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&JobState::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!(JobState::Preempted.to_string(), "PREEMPTED");
    }

    #[test]
    fn test_field_lookup() {
        let fields = BTreeMap::from([("queue".to_string(), "workq".to_string())]);
        let info = JobInfo::new(JobState::Running, fields);
        assert_eq!(info.field("queue"), Some("workq"));
        assert_eq!(info.field("Queue"), Some("workq"));
        assert_eq!(info.field("S"), None);
    }
}
