use chrono::{DateTime, Utc};

/// Classification of an upstream probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Rolling per-source probe statistics.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HealthCheckResult {
    pub source_name: String,
    pub status: HealthStatus,
    /// Last probe round-trip in milliseconds.
    pub response_time_ms: f64,
    /// Rolling average over all probes of this source.
    pub avg_response_time_ms: f64,
    pub http_status: Option<u16>,
    pub error_message: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub success_rate: f64,
}

impl HealthCheckResult {
    pub fn unknown(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            status: HealthStatus::Unknown,
            response_time_ms: 0.0,
            avg_response_time_ms: 0.0,
            http_status: None,
            error_message: None,
            last_check: None,
            consecutive_failures: 0,
            total_checks: 0,
            success_rate: 100.0,
        }
    }
}

/// One recorded promotion of a new active source for an ecosystem.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FailoverEvent {
    pub timestamp: DateTime<Utc>,
    pub mirror_type: String,
    pub old_source: Option<String>,
    pub new_source: String,
    pub reason: String,
}

/// Aggregate health figures for the control API.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HealthSummary {
    pub total_sources: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub avg_response_time_ms: f64,
}
