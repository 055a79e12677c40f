use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ParseEnumError;

/// Processing order for prewarm items: `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PrewarmPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl PrewarmPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrewarmPriority::Low => "low",
            PrewarmPriority::Medium => "medium",
            PrewarmPriority::High => "high",
            PrewarmPriority::Critical => "critical",
        }
    }
}

impl FromStr for PrewarmPriority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(PrewarmPriority::Low),
            "medium" => Ok(PrewarmPriority::Medium),
            "high" => Ok(PrewarmPriority::High),
            "critical" => Ok(PrewarmPriority::Critical),
            other => Err(ParseEnumError::new("prewarm_priority", other)),
        }
    }
}

impl fmt::Display for PrewarmPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PrewarmItemStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl PrewarmItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrewarmItemStatus::Pending => "pending",
            PrewarmItemStatus::Running => "running",
            PrewarmItemStatus::Success => "success",
            PrewarmItemStatus::Failed => "failed",
            PrewarmItemStatus::Skipped => "skipped",
        }
    }
}

/// One artifact scheduled for proactive cache fill.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrewarmItem {
    pub id: String,
    pub mirror_type: String,
    pub item_name: String,
    pub url: String,
    pub priority: PrewarmPriority,
    pub status: PrewarmItemStatus,
    pub attempts: u32,
    pub response_time_ms: Option<u64>,
    pub size_bytes: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A curated prewarm request: which ecosystem, which items, how urgently.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrewarmTarget {
    pub mirror_type: String,
    pub items: Vec<String>,
    pub priority: PrewarmPriority,
    /// Cap on items taken from `items`; `0` means no cap.
    pub limit: usize,
}

/// Outcome of one prewarm run; the last ~20 summaries form the history.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrewarmSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_seconds: f64,
    pub finished_at: DateTime<Utc>,
}
