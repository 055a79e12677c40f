use std::fmt;
use std::str::FromStr;

use crate::error::ParseEnumError;

/// Synchronisation state of a file record relative to the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SyncStatus {
    Pending,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(ParseEnumError::new("sync_status", other)),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file tracked by the metadata store.
///
/// `path` is always forward-slash separated and relative to the server base
/// directory. At most one non-deleted record may exist per path; deletes are
/// soft (`is_deleted = true`) so download history stays attributable.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileRecord {
    pub file_id: String,
    pub path: String,
    pub name: String,
    pub size: i64,
    pub hash: Option<String>,
    pub mime_type: Option<String>,
    pub is_dir: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed: i64,
    pub download_count: i64,
    pub is_deleted: bool,
    pub sync_status: SyncStatus,
}

impl FileRecord {
    /// Build a fresh record for a path discovered on disk or via upload.
    pub fn new(file_id: impl Into<String>, path: impl Into<String>, size: i64) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(path.as_str()).to_string();
        let now = crate::epoch_now();
        Self {
            file_id: file_id.into(),
            path,
            name,
            size,
            hash: None,
            mime_type: None,
            is_dir: false,
            created_at: now,
            updated_at: now,
            last_accessed: now,
            download_count: 0,
            is_deleted: false,
            sync_status: SyncStatus::Pending,
        }
    }
}
