//! # Stockpile Server
//!
//! Multi-protocol caching mirror server: PyPI, Docker Registry v2, APT,
//! YUM, npm, Go modules, and generic HTTP upstreams served from one local
//! content store, with a JSON control plane for sync, health/failover,
//! cache management, webhooks, and lifecycle.
//!
//! ## Architecture
//!
//! Built on axum; persistent metadata in sqlite (embedded) or PostgreSQL
//! via sqlx; the artifact cache is a plain file tree with TTL sidecars so
//! it can also be served (and rsynced) as static files. Construction is
//! explicit: auth first, then the mirror registry, then sync/prewarm, then
//! the routers — no service discovers another through shared mutable
//! config.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::RwLock;
use stockpile_config::Config;
use stockpile_core::auth::AuthManager;
use stockpile_core::db::Database;
use stockpile_core::health::{FailoverManager, HealthChecker, run_health_loop};
use stockpile_core::lifecycle::RestartManager;
use stockpile_core::mirrors::MirrorRegistry;
use stockpile_core::monitor::MonitorSampler;
use stockpile_core::prewarm::CachePrewarmer;
use stockpile_core::store::ContentStore;
use stockpile_core::sync::SyncManager;
use stockpile_core::Fetcher;
use tokio::task::JoinHandle;
use tracing::error;

pub use routes::create_router;
pub use state::AppState;

/// Wire up every service from a resolved configuration. Background loops
/// are not started here; see [`spawn_background`].
pub async fn build_state(config: Config, settings_path: Option<PathBuf>) -> anyhow::Result<AppState> {
    config.ensure_directories()?;

    let db = Database::connect(&config.database)
        .await
        .context("metadata store connection failed")?;
    let store = Arc::new(
        ContentStore::new(&config.server.base_dir).context("content store init failed")?,
    );
    let fetcher = Arc::new(
        Fetcher::new(
            &config.server.user_agent,
            Duration::from_secs(config.cache.fetch_timeout_secs),
            config.cache.max_redirects,
            config.cache.retry_attempts,
        )
        .context("http client init failed")?,
    );

    // Auth is built first; routers receive it fully formed.
    let auth = Arc::new(AuthManager::new(
        db.clone(),
        config.auth.clone(),
        config.server.state_dir.clone(),
        !config.database.is_embedded(),
    ));

    let health = Arc::new(HealthChecker::new(fetcher.clone(), &config.health));
    let failover = Arc::new(FailoverManager::new(&config.health, &config.mirrors));
    let registry = Arc::new(MirrorRegistry::new(
        &config.mirrors,
        &config.cache,
        &config.auth.secret_key,
        store.clone(),
        fetcher.clone(),
        failover.clone(),
    ));
    let sync = Arc::new(SyncManager::new(
        db.clone(),
        registry.clone(),
        config.sync.clone(),
        config.server.base_dir.clone(),
    ));
    let prewarmer = Arc::new(CachePrewarmer::new(registry.clone(), &config.prewarm));
    let lifecycle = RestartManager::new(Duration::from_secs(config.lifecycle.graceful_timeout_secs));
    let monitor = Arc::new(MonitorSampler::new(
        db.clone(),
        lifecycle.clone(),
        config.server.base_dir.clone(),
        config.monitor.interval_secs,
        config.monitor.retention_hours,
    ));

    Ok(AppState {
        config: Arc::new(RwLock::new(Arc::new(config))),
        settings_path,
        db,
        store,
        fetcher,
        registry,
        sync,
        health,
        failover,
        prewarmer,
        monitor,
        lifecycle,
        auth,
        started_at: chrono::Utc::now(),
    })
}

/// Start the background loops: sync/scan/schedule, health probing, the
/// monitor sampler, and the cache sweeper.
pub fn spawn_background(state: &AppState) -> Vec<JoinHandle<()>> {
    let config = state.config();
    let mut handles = state.sync.spawn_loops();

    if config.health.enabled {
        let checker = state.health.clone();
        let failover = state.failover.clone();
        let interval = Duration::from_secs(config.health.interval_secs.max(5));
        handles.push(tokio::spawn(run_health_loop(checker, failover, interval)));
    }

    if config.monitor.enabled {
        handles.push(tokio::spawn(state.monitor.clone().run_loop()));
    }

    {
        let store = state.store.clone();
        let interval = Duration::from_secs(config.cache.sweep_interval_secs.max(60));
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = store.sweep().await {
                    error!(error = %err, "cache sweep failed");
                }
            }
        }));
    }

    handles
}
