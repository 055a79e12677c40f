use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// HTTP listener, filesystem roots, and request-facing switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Root of the served file tree and all per-ecosystem caches.
    pub base_dir: PathBuf,
    /// Where JSON state (admin keys, sessions) lands when the embedded
    /// database is not in use.
    pub state_dir: PathBuf,
    pub access_log: PathBuf,
    pub directory_listing: bool,
    pub max_upload_size: u64,
    pub cors_allowed_origins: Vec<String>,
    pub user_agent: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8628,
            base_dir: PathBuf::from("./data"),
            state_dir: PathBuf::from("./state"),
            access_log: PathBuf::from("./state/access.log"),
            directory_listing: true,
            max_upload_size: 2 * 1024 * 1024 * 1024,
            cors_allowed_origins: vec!["*".to_string()],
            user_agent: format!("stockpile-mirror/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Metadata-store backend selection. `conn_str` wins when present; otherwise
/// the URL is assembled from the discrete fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// `sqlite` (embedded) or `postgres` (networked).
    pub db_type: String,
    pub path: PathBuf,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub conn_str: Option<String>,
    pub table_prefix: String,
    pub pool_size: u32,
    /// Connections are recycled after this many seconds.
    pub recycle_secs: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            path: PathBuf::from("./state/stockpile.db"),
            host: "localhost".to_string(),
            port: 5432,
            name: "stockpile".to_string(),
            user: "stockpile".to_string(),
            password: String::new(),
            conn_str: None,
            table_prefix: String::new(),
            pool_size: 5,
            recycle_secs: 1800,
        }
    }
}

impl DatabaseSection {
    /// Resolve the connection URL for the configured backend.
    pub fn url(&self) -> String {
        if let Some(conn_str) = &self.conn_str {
            return conn_str.clone();
        }
        match self.db_type.as_str() {
            "postgres" | "postgresql" => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.name
            ),
            _ => format!("sqlite://{}?mode=rwc", self.path.display()),
        }
    }

    pub fn is_embedded(&self) -> bool {
        match &self.conn_str {
            Some(url) => url.starts_with("sqlite:"),
            None => !matches!(self.db_type.as_str(), "postgres" | "postgresql"),
        }
    }
}

/// Cache TTLs and upstream fetch tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    /// TTL for indexes and metadata documents.
    pub default_ttl_secs: u64,
    /// TTL for content-addressed artifacts (effectively immutable upstream).
    pub artifact_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub artifact_timeout_secs: u64,
    pub max_redirects: usize,
    pub retry_attempts: u32,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 3600,
            artifact_ttl_secs: 30 * 24 * 3600,
            sweep_interval_secs: 3600,
            fetch_timeout_secs: 30,
            artifact_timeout_secs: 120,
            max_redirects: 10,
            retry_attempts: 3,
        }
    }
}

/// One upstream source in an ecosystem's failover priority list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSource {
    pub name: String,
    pub url: String,
}

/// Per-ecosystem mirror settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorEntry {
    pub enabled: bool,
    /// Explicit upstream; when unset the first source (or the built-in
    /// default for the ecosystem) is used.
    pub upstream_url: Option<String>,
    /// Failover priority list, most preferred first.
    pub sources: Vec<UpstreamSource>,
    /// Upstream credentials (container registries).
    pub username: Option<String>,
    pub password: Option<String>,
    /// APT-specific defaults.
    pub suite: Option<String>,
    pub components: Vec<String>,
    pub arch: Option<String>,
    pub cache_ttl_secs: Option<u64>,
}

impl Default for MirrorEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            upstream_url: None,
            sources: Vec::new(),
            username: None,
            password: None,
            suite: None,
            components: Vec::new(),
            arch: None,
            cache_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorsSection {
    pub entries: BTreeMap<String, MirrorEntry>,
}

impl Default for MirrorsSection {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        for kind in ["pypi", "docker", "apt", "yum", "npm", "go"] {
            entries.insert(kind.to_string(), MirrorEntry::default());
        }
        Self { entries }
    }
}

/// Interval spec for scheduled syncs; the components are summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalSpec {
    pub seconds: u64,
    pub minutes: u64,
    pub hours: u64,
    pub days: u64,
}

impl IntervalSpec {
    pub fn total_seconds(&self) -> u64 {
        self.seconds + self.minutes * 60 + self.hours * 3600 + self.days * 86400
    }
}

/// Schedule for a sync source: five-field cron or a simple interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSpec {
    pub enabled: bool,
    /// `cron` or `interval`.
    pub kind: String,
    pub cron: Option<String>,
    pub interval: IntervalSpec,
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: "interval".to_string(),
            cron: None,
            interval: IntervalSpec::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSourceConfig {
    pub source_type: String,
    pub schedule: ScheduleSpec,
    /// Items pulled during a bulk sync of this source.
    pub items: Vec<String>,
}

impl Default for SyncSourceConfig {
    fn default() -> Self {
        Self {
            source_type: "http".to_string(),
            schedule: ScheduleSpec::default(),
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub enabled: bool,
    /// Queue-drain tick for the metadata store.
    pub sync_interval_secs: u64,
    /// Filesystem reconciliation scan tick.
    pub scan_interval_secs: u64,
    pub auto_scan: bool,
    pub sources: BTreeMap<String, SyncSourceConfig>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_secs: 60,
            scan_interval_secs: 300,
            auto_scan: true,
            sources: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub failure_threshold: u32,
    pub failover_enabled: bool,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            timeout_secs: 10,
            failure_threshold: 3,
            failover_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrewarmTargetSpec {
    pub mirror_type: String,
    pub items: Vec<String>,
    pub priority: String,
    pub limit: usize,
}

impl Default for PrewarmTargetSpec {
    fn default() -> Self {
        Self {
            mirror_type: String::new(),
            items: Vec::new(),
            priority: "medium".to_string(),
            limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrewarmSection {
    pub enabled: bool,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub targets: Vec<PrewarmTargetSpec>,
}

impl Default for PrewarmSection {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: 4,
            max_attempts: 2,
            targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSpec {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: 120,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutSpec {
    pub max_failures: u32,
    pub window_secs: i64,
    pub duration_secs: i64,
}

impl Default for LockoutSpec {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window_secs: 300,
            duration_secs: 900,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub enabled: bool,
    /// Static fallback account, checked when the user table has no match.
    pub admin_user: String,
    pub admin_password: String,
    /// Server secret for session and registry-token MACs.
    pub secret_key: String,
    pub session_ttl_secs: i64,
    pub cookie_name: String,
    pub ip_allowlist_enabled: bool,
    pub ip_allowlist: Vec<String>,
    pub rate_limit: RateLimitSpec,
    pub lockout: LockoutSpec,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_user: "admin".to_string(),
            admin_password: String::new(),
            secret_key: String::new(),
            session_ttl_secs: 24 * 3600,
            cookie_name: "stockpile_session".to_string(),
            ip_allowlist_enabled: false,
            ip_allowlist: Vec::new(),
            rate_limit: RateLimitSpec::default(),
            lockout: LockoutSpec::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub interval_secs: u64,
    pub retention_hours: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            retention_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSection {
    pub graceful_timeout_secs: u64,
    /// `graceful`, `immediate`, or `rolling`.
    pub default_strategy: String,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            graceful_timeout_secs: 30,
            default_strategy: "graceful".to_string(),
        }
    }
}
