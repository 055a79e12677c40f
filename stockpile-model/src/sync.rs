use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ParseEnumError;

/// Lifecycle of a bulk sync run. Transitions are monotonic:
/// `Pending -> Running -> (Completed | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SyncRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Pending => "pending",
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: SyncRunStatus) -> bool {
        matches!(
            (self, next),
            (SyncRunStatus::Pending, SyncRunStatus::Running)
                | (SyncRunStatus::Running, SyncRunStatus::Completed)
                | (SyncRunStatus::Running, SyncRunStatus::Failed)
        )
    }
}

impl FromStr for SyncRunStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncRunStatus::Pending),
            "running" => Ok(SyncRunStatus::Running),
            "completed" => Ok(SyncRunStatus::Completed),
            "failed" => Ok(SyncRunStatus::Failed),
            other => Err(ParseEnumError::new("sync_run_status", other)),
        }
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted history entry for one bulk sync run of a source.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncRun {
    pub sync_id: String,
    pub source_type: String,
    pub source_name: String,
    pub status: SyncRunStatus,
    pub total_files: i64,
    pub synced_files: i64,
    pub failed_files: i64,
    pub total_size: i64,
    pub synced_size: i64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

/// Live progress for a sync source, reported by the control API.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncProgress {
    pub source_name: String,
    pub status: SyncRunStatus,
    pub total_files: u64,
    pub synced_files: u64,
    pub failed_files: u64,
    pub is_temp_sync: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub next_sync: Option<DateTime<Utc>>,
}

impl SyncProgress {
    pub fn idle(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            status: SyncRunStatus::Pending,
            total_files: 0,
            synced_files: 0,
            failed_files: 0,
            is_temp_sync: false,
            last_sync: None,
            next_sync: None,
        }
    }
}
