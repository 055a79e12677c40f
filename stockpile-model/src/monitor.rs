/// One periodic system resource sample.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorSample {
    pub timestamp: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_rx: i64,
    pub network_tx: i64,
    pub active_connections: i64,
    pub server_uptime: i64,
    /// Set when an OS counter could not be read and was reported as zero.
    pub note: Option<String>,
}

impl MonitorSample {
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            network_rx: 0,
            network_tx: 0,
            active_connections: 0,
            server_uptime: 0,
            note: None,
        }
    }
}
