/// Append-only record of a served download.
///
/// Statistics (rank, trend, activity timelines) are derived by aggregating
/// these rows; the per-file counter on [`crate::FileRecord`] is only a
/// best-effort display convenience.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DownloadRecord {
    pub file_path: String,
    pub file_size: i64,
    pub download_time: i64,
    /// Wall-clock serving duration in seconds.
    pub duration: f64,
    pub client_ip: String,
    pub user_agent: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl DownloadRecord {
    pub fn success(path: impl Into<String>, size: i64) -> Self {
        Self {
            file_path: path.into(),
            file_size: size,
            download_time: crate::epoch_now(),
            duration: 0.0,
            client_ip: String::new(),
            user_agent: String::new(),
            success: true,
            error_message: None,
        }
    }
}
