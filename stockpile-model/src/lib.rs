//! Shared data types for the stockpile caching mirror server.
//!
//! Everything that crosses a crate boundary lives here: the metadata-store
//! entities (files, downloads, sync runs, cache index, webhooks, monitor
//! samples, users, admin keys) and the runtime status types exposed by the
//! control API (health checks, failover events, prewarm progress).
//!
//! Persisted entities use epoch-second `i64` timestamps so the same column
//! types work on both the embedded and networked database backends.
//! Runtime-only types use `chrono::DateTime<Utc>`.

pub mod cache;
pub mod downloads;
pub mod error;
pub mod files;
pub mod health;
pub mod keys;
pub mod monitor;
pub mod prewarm;
pub mod sync;
pub mod users;
pub mod webhooks;

pub use cache::{CacheRecord, CacheStats, SchemaVersion, format_size};
pub use downloads::DownloadRecord;
pub use error::ParseEnumError;
pub use files::{FileRecord, SyncStatus};
pub use health::{FailoverEvent, HealthCheckResult, HealthStatus, HealthSummary};
pub use keys::AdminApiKey;
pub use monitor::MonitorSample;
pub use prewarm::{
    PrewarmItem, PrewarmItemStatus, PrewarmPriority, PrewarmSummary, PrewarmTarget,
};
pub use sync::{SyncProgress, SyncRun, SyncRunStatus};
pub use users::{LoginLogEntry, LoginStatus, User};
pub use webhooks::{DeliveryStatus, Webhook, WebhookDelivery};

/// Current epoch seconds. Persisted timestamps throughout the workspace use
/// this representation.
pub fn epoch_now() -> i64 {
    chrono::Utc::now().timestamp()
}
