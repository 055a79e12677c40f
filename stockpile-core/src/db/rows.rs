//! Private row structs. `FromRow` stays generic over the driver, so the
//! same struct decodes sqlite and postgres rows; status strings are parsed
//! into the model enums at the conversion boundary.

use std::str::FromStr;

use sqlx::FromRow;
use stockpile_model::{
    DeliveryStatus, DownloadRecord, FileRecord, LoginLogEntry, LoginStatus, MonitorSample,
    SchemaVersion, SyncRun, SyncRunStatus, SyncStatus, User, Webhook, WebhookDelivery,
};

use crate::error::{CoreError, Result};

#[derive(Debug, FromRow)]
pub(crate) struct SchemaVersionRow {
    pub version: i64,
    pub applied_at: i64,
    pub description: String,
}

impl From<SchemaVersionRow> for SchemaVersion {
    fn from(row: SchemaVersionRow) -> Self {
        SchemaVersion {
            version: row.version,
            applied_at: row.applied_at,
            description: row.description,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct FileRow {
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
    pub sync_status: String,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = CoreError;

    fn try_from(row: FileRow) -> Result<Self> {
        Ok(FileRecord {
            file_id: row.file_id,
            path: row.path,
            name: row.name,
            size: row.size,
            hash: row.hash,
            mime_type: row.mime_type,
            is_dir: row.is_dir,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_accessed: row.last_accessed,
            download_count: row.download_count,
            is_deleted: row.is_deleted,
            sync_status: SyncStatus::from_str(&row.sync_status)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct DownloadRow {
    pub file_path: String,
    pub file_size: i64,
    pub download_time: i64,
    pub duration: f64,
    pub client_ip: String,
    pub user_agent: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl From<DownloadRow> for DownloadRecord {
    fn from(row: DownloadRow) -> Self {
        DownloadRecord {
            file_path: row.file_path,
            file_size: row.file_size,
            download_time: row.download_time,
            duration: row.duration,
            client_ip: row.client_ip,
            user_agent: row.user_agent,
            success: row.success,
            error_message: row.error_message,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct SyncRunRow {
    pub sync_id: String,
    pub source_type: String,
    pub source_name: String,
    pub status: String,
    pub total_files: i64,
    pub synced_files: i64,
    pub failed_files: i64,
    pub total_size: i64,
    pub synced_size: i64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

impl TryFrom<SyncRunRow> for SyncRun {
    type Error = CoreError;

    fn try_from(row: SyncRunRow) -> Result<Self> {
        Ok(SyncRun {
            sync_id: row.sync_id,
            source_type: row.source_type,
            source_name: row.source_name,
            status: SyncRunStatus::from_str(&row.status)?,
            total_files: row.total_files,
            synced_files: row.synced_files,
            failed_files: row.failed_files,
            total_size: row.total_size,
            synced_size: row.synced_size,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct CacheRow {
    pub cache_key: String,
    pub cache_type: String,
    pub file_path: Option<String>,
    pub file_size: i64,
    pub file_hash: Option<String>,
    pub hits: i64,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub last_hit: i64,
}

impl From<CacheRow> for stockpile_model::CacheRecord {
    fn from(row: CacheRow) -> Self {
        stockpile_model::CacheRecord {
            cache_key: row.cache_key,
            cache_type: row.cache_type,
            file_path: row.file_path,
            file_size: row.file_size,
            file_hash: row.file_hash,
            hits: row.hits,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_hit: row.last_hit,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct WebhookRow {
    pub id: String,
    pub name: String,
    pub url: String,
    pub events: String,
    pub secret: Option<String>,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<WebhookRow> for Webhook {
    fn from(row: WebhookRow) -> Self {
        Webhook {
            id: row.id,
            name: row.name,
            url: row.url,
            events: serde_json::from_str(&row.events).unwrap_or_default(),
            secret: row.secret,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct DeliveryRow {
    pub id: String,
    pub webhook_id: String,
    pub event: String,
    pub status: String,
    pub status_code: Option<i64>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub retry_count: i64,
    pub created_at: i64,
}

impl TryFrom<DeliveryRow> for WebhookDelivery {
    type Error = CoreError;

    fn try_from(row: DeliveryRow) -> Result<Self> {
        Ok(WebhookDelivery {
            id: row.id,
            webhook_id: row.webhook_id,
            event: row.event,
            status: DeliveryStatus::from_str(&row.status)?,
            status_code: row.status_code,
            response_body: row.response_body,
            error_message: row.error_message,
            duration_ms: row.duration_ms,
            retry_count: row.retry_count,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MonitorRow {
    pub timestamp: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_rx: i64,
    pub network_tx: i64,
    pub active_connections: i64,
    pub server_uptime: i64,
    pub note: Option<String>,
}

impl From<MonitorRow> for MonitorSample {
    fn from(row: MonitorRow) -> Self {
        MonitorSample {
            timestamp: row.timestamp,
            cpu_percent: row.cpu_percent,
            memory_percent: row.memory_percent,
            disk_percent: row.disk_percent,
            network_rx: row.network_rx,
            network_tx: row.network_tx,
            active_connections: row.active_connections,
            server_uptime: row.server_uptime,
            note: row.note,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub email: Option<String>,
    pub last_login: Option<i64>,
    pub login_count: i64,
    pub failed_attempts: i64,
    pub locked_until: Option<i64>,
    pub enabled: bool,
    pub created_at: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            username: row.username,
            password_hash: row.password_hash,
            role: row.role,
            email: row.email,
            last_login: row.last_login,
            login_count: row.login_count,
            failed_attempts: row.failed_attempts,
            locked_until: row.locked_until,
            enabled: row.enabled,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct LoginLogRow {
    pub username: String,
    pub ip: String,
    pub user_agent: String,
    pub status: String,
    pub reason: Option<String>,
    pub timestamp: i64,
}

impl TryFrom<LoginLogRow> for LoginLogEntry {
    type Error = CoreError;

    fn try_from(row: LoginLogRow) -> Result<Self> {
        Ok(LoginLogEntry {
            username: row.username,
            ip: row.ip,
            user_agent: row.user_agent,
            status: LoginStatus::from_str(&row.status)?,
            reason: row.reason,
            timestamp: row.timestamp,
        })
    }
}
