use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use stockpile_config::Config;
use stockpile_core::auth::AuthManager;
use stockpile_core::db::Database;
use stockpile_core::health::{FailoverManager, HealthChecker};
use stockpile_core::lifecycle::RestartManager;
use stockpile_core::mirrors::MirrorRegistry;
use stockpile_core::monitor::MonitorSampler;
use stockpile_core::prewarm::CachePrewarmer;
use stockpile_core::store::ContentStore;
use stockpile_core::sync::SyncManager;
use stockpile_core::Fetcher;

/// Shared application state. Construction order is explicit (auth before
/// the routers, registry before sync/prewarm); nothing reaches back into a
/// shared mutable config to find its collaborators.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Arc<Config>>>,
    pub settings_path: Option<PathBuf>,
    pub db: Database,
    pub store: Arc<ContentStore>,
    pub fetcher: Arc<Fetcher>,
    pub registry: Arc<MirrorRegistry>,
    pub sync: Arc<SyncManager>,
    pub health: Arc<HealthChecker>,
    pub failover: Arc<FailoverManager>,
    pub prewarmer: Arc<CachePrewarmer>,
    pub monitor: Arc<MonitorSampler>,
    pub lifecycle: Arc<RestartManager>,
    pub auth: Arc<AuthManager>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    /// Atomically swap in a freshly loaded configuration.
    pub fn swap_config(&self, config: Config) {
        *self.config.write() = Arc::new(config);
    }
}
