//! Cache control endpoints: stats, cleanup, usage, popularity, prewarm.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stockpile_model::{PrewarmItemStatus, PrewarmPriority, PrewarmTarget, format_size};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// GET /cache/stats — per-ecosystem on-disk figures plus the index view.
pub async fn cache_stats(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let per_mirror = state.registry.total_stats().await;
    let mut total_files = 0u64;
    let mut total_bytes = 0u64;
    let mut mirrors = serde_json::Map::new();
    for (kind, stats) in &per_mirror {
        total_files += stats.files;
        total_bytes += stats.bytes;
        mirrors.insert(
            kind.clone(),
            json!({
                "files": stats.files,
                "bytes": stats.bytes,
                "size": format_size(stats.bytes),
            }),
        );
    }
    let (indexed_entries, indexed_bytes) = state.db.cache_index_usage().await?;
    Ok(Json(json!({
        "total_files": total_files,
        "total_bytes": total_bytes,
        "total_size": format_size(total_bytes),
        "mirrors": mirrors,
        "index": { "entries": indexed_entries, "bytes": indexed_bytes },
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanQuery {
    /// Restrict the clean to one ecosystem; drops everything under it.
    pub mirror: Option<String>,
}

/// POST /cache/clean — sweep expired entries and orphan temp files, or
/// purge one ecosystem wholesale.
pub async fn cache_clean(
    State(state): State<AppState>,
    Query(query): Query<CleanQuery>,
) -> AppResult<Json<serde_json::Value>> {
    if let Some(mirror) = query.mirror {
        let removed = state.store.purge_namespace(&mirror).await?;
        return Ok(Json(json!({ "purged": mirror, "files_removed": removed })));
    }
    let report = state.store.sweep().await?;
    Ok(Json(json!({
        "expired_removed": report.expired_removed,
        "orphan_tmp_removed": report.orphan_tmp_removed,
        "bytes_freed": report.bytes_freed,
    })))
}

/// GET /cache/usage — store totals.
pub async fn cache_usage(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let stats = state.store.stats(None).await?;
    Ok(Json(json!({
        "files": stats.files,
        "bytes": stats.bytes,
        "size": format_size(stats.bytes),
    })))
}

/// GET /cache/popular — most-hit cache keys from the index.
pub async fn cache_popular(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let entries = state.db.popular_cache_entries(50).await?;
    Ok(Json(json!({ "popular": entries })))
}

#[derive(Debug, Deserialize)]
pub struct PrewarmBody {
    #[serde(default)]
    pub targets: Vec<PrewarmTargetBody>,
}

#[derive(Debug, Deserialize)]
pub struct PrewarmTargetBody {
    #[serde(alias = "type")]
    pub mirror_type: String,
    pub items: Vec<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub limit: usize,
}

/// POST /cache/prewarm — run a pass now (request targets or configured
/// defaults).
pub async fn prewarm_run(
    State(state): State<AppState>,
    body: Option<Json<PrewarmBody>>,
) -> AppResult<Json<serde_json::Value>> {
    let targets = body.and_then(|Json(body)| {
        if body.targets.is_empty() {
            None
        } else {
            Some(
                body.targets
                    .into_iter()
                    .map(|t| PrewarmTarget {
                        mirror_type: t.mirror_type,
                        items: t.items,
                        priority: t
                            .priority
                            .as_deref()
                            .and_then(|p| p.parse().ok())
                            .unwrap_or(PrewarmPriority::Medium),
                        limit: t.limit,
                    })
                    .collect(),
            )
        }
    });

    let summary = state.prewarmer.run(targets).await?;
    Ok(Json(serde_json::to_value(summary)?))
}

pub async fn prewarm_stats(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let failed = state.prewarmer.items(Some(PrewarmItemStatus::Failed)).await.len();
    let pending = state.prewarmer.items(Some(PrewarmItemStatus::Pending)).await.len();
    Ok(Json(json!({
        "running": state.prewarmer.is_running(),
        "pending_items": pending,
        "failed_items": failed,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ItemsQuery {
    pub status: Option<String>,
}

pub async fn prewarm_items(
    State(state): State<AppState>,
    Query(query): Query<ItemsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let status = match query.status.as_deref() {
        None => None,
        Some("pending") => Some(PrewarmItemStatus::Pending),
        Some("failed") => Some(PrewarmItemStatus::Failed),
        Some("success") => Some(PrewarmItemStatus::Success),
        Some("skipped") => Some(PrewarmItemStatus::Skipped),
        Some(other) => return Err(AppError::bad_request(format!("unknown status: {other}"))),
    };
    Ok(Json(json!({ "items": state.prewarmer.items(status).await })))
}

pub async fn prewarm_clear(
    State(state): State<AppState>,
    Query(query): Query<ItemsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let status = match query.status.as_deref() {
        None => None,
        Some("failed") => Some(PrewarmItemStatus::Failed),
        Some("pending") => Some(PrewarmItemStatus::Pending),
        Some(other) => return Err(AppError::bad_request(format!("unknown status: {other}"))),
    };
    Ok(Json(json!({ "cleared": state.prewarmer.clear_items(status).await })))
}

pub async fn prewarm_history(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "history": state.prewarmer.history(20).await })))
}
