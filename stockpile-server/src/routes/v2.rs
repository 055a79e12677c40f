use axum::Router;
use axum::routing::{get, post, put};

use crate::handlers::{
    admin, cache, config, files, health, metrics, mirrors, monitor, server, stats, sync, upload,
    user, webhooks,
};
use crate::middleware;
use crate::state::AppState;

/// The full control surface.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // Server info + stats
        .route("/", get(server::server_info))
        .route("/stats", get(stats::overview))
        .route("/stats/download-trend", get(stats::download_trend))
        .route("/stats/rank", get(stats::rank))
        .route("/activity", get(stats::activity))
        .route("/metrics", get(metrics::metrics))
        // Files
        .route("/files", get(files::list_files).post(files::create_entry))
        .route("/files/search", get(files::search_files))
        .route(
            "/file/{*path}",
            get(files::get_file)
                .put(files::move_file)
                .delete(files::delete_file),
        )
        .route("/upload", post(upload::upload))
        // Mirrors
        .route("/mirrors", get(mirrors::list_mirrors).post(mirrors::create_mirror))
        .route(
            "/mirrors/{name}",
            get(mirrors::get_mirror)
                .put(mirrors::put_mirror)
                .delete(mirrors::delete_mirror),
        )
        .route("/mirrors/{name}/enable", post(mirrors::enable_mirror))
        .route("/mirrors/{name}/refresh", post(mirrors::refresh_mirror))
        // Sync
        .route("/sync/sources", get(sync::list_sources).post(sync::put_source))
        .route("/sync/history", get(sync::sync_history))
        .route("/sync/packages", post(sync::sync_packages))
        .route("/sync/packages/{id}/status", get(sync::package_sync_status))
        .route("/sync/scan", post(sync::scan_now))
        .route("/sync/{name}/start", post(sync::start_sync))
        .route("/sync/{name}/stop", post(sync::stop_sync))
        .route("/sync/{name}/status", get(sync::sync_status))
        // Cache
        .route("/cache/stats", get(cache::cache_stats))
        .route("/cache/clean", post(cache::cache_clean))
        .route("/cache/usage", get(cache::cache_usage))
        .route("/cache/popular", get(cache::cache_popular))
        .route("/cache/prewarm", get(cache::prewarm_stats).post(cache::prewarm_run))
        .route("/cache/prewarm/stats", get(cache::prewarm_stats))
        .route(
            "/cache/prewarm/items",
            get(cache::prewarm_items).post(cache::prewarm_run),
        )
        .route("/cache/prewarm/history", get(cache::prewarm_history))
        .route("/cache/prewarm/clear", post(cache::prewarm_clear))
        // Health / failover
        .route("/health", get(health::upstream_health))
        .route("/health/sources", get(health::health_sources))
        .route("/health/check/{name}", post(health::check_source))
        .route("/health/failover", get(health::failover_status))
        .route("/health/failover/{type}", post(health::trigger_failover))
        // Webhooks
        .route("/webhooks", get(webhooks::list_webhooks).post(webhooks::create_webhook))
        .route(
            "/webhooks/{id}",
            get(webhooks::get_webhook)
                .put(webhooks::update_webhook)
                .delete(webhooks::delete_webhook),
        )
        .route("/webhooks/{id}/test", post(webhooks::test_webhook))
        .route("/webhooks/{id}/deliveries", get(webhooks::list_deliveries))
        .route("/webhooks/{id}/stats", get(webhooks::webhook_stats))
        // Config
        .route("/config", get(config::get_config).put(config::put_config))
        .route("/config/reload", post(config::reload_config))
        .route("/config/changes", get(config::config_changes))
        // Lifecycle
        .route(
            "/server/restart",
            get(server::restart_status).post(server::prepare_restart),
        )
        .route("/server/restart/confirm", post(server::confirm_restart))
        .route("/server/restart/immediate", post(server::immediate_restart))
        .route(
            "/server/restart/pending",
            get(server::pending_restart).delete(server::cancel_restart),
        )
        .route("/server/restart/history", get(server::restart_history))
        .route("/server/restart/config", get(server::restart_config))
        // Users
        .route("/user/login", post(user::login))
        .route("/user/logout", post(user::logout))
        .route("/user/password", put(user::change_password))
        .route("/user/login-logs", get(user::login_logs))
        // Admin keys
        .route("/admin/keys", get(admin::list_keys).post(admin::create_key))
        .route("/admin/keys/{id}", axum::routing::delete(admin::delete_key))
        .route("/admin/keys/{id}/{action}", post(admin::set_key_enabled))
        // Monitoring
        .route("/monitor/realtime", get(monitor::realtime))
        .route("/monitor/history", get(monitor::history))
        .route("/monitor/detailed", get(monitor::detailed))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::api_auth,
        ))
}
