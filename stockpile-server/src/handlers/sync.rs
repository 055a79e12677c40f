//! Sync control endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stockpile_config::SyncSourceConfig;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// GET /sync/sources — configured sources with live progress.
pub async fn list_sources(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let config = state.config();
    let progress = state.sync.all_progress().await;

    let sources: Vec<serde_json::Value> = config
        .sync
        .sources
        .iter()
        .map(|(name, source)| {
            let live = progress.iter().find(|p| &p.source_name == name);
            json!({
                "name": name,
                "type": source.source_type,
                "schedule": source.schedule,
                "items": source.items.len(),
                "progress": live,
            })
        })
        .collect();
    Ok(Json(json!({ "sources": sources, "status": state.sync.status().await })))
}

/// POST /sync/sources — add or replace a source definition.
pub async fn put_source(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> AppResult<Json<serde_json::Value>> {
    let name = body
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| AppError::bad_request("source needs a name"))?
        .to_string();
    let source: SyncSourceConfig = serde_json::from_value(
        body.get("source").cloned().unwrap_or(body.clone()),
    )
    .map_err(|err| AppError::bad_request(format!("invalid source definition: {err}")))?;

    let Some(settings_path) = state.settings_path.clone() else {
        return Err(AppError::conflict("no settings file configured"));
    };
    let mut sources = serde_json::Map::new();
    sources.insert(name.clone(), serde_json::to_value(&source)?);
    let patch = json!({ "sync": { "sources": sources } });
    let reloaded = stockpile_config::Config::save_patch(&settings_path, patch)?;
    state.swap_config(reloaded);
    Ok(Json(json!({ "saved": name })))
}

pub async fn start_sync(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let sync_id = state.sync.start_sync(&name).await?;
    Ok(Json(json!({ "started": name, "sync_id": sync_id })))
}

pub async fn stop_sync(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    if state.sync.request_stop(&name).await {
        Ok(Json(json!({ "stopping": name })))
    } else {
        Err(AppError::conflict(format!("{name} is not running")))
    }
}

pub async fn sync_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    match state.sync.progress_for(&name).await {
        Some(progress) => Ok(Json(serde_json::to_value(progress)?)),
        None => Err(AppError::not_found(format!("no sync state for {name}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

pub async fn sync_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let runs = state.sync.history(query.limit.clamp(1, 500)).await?;
    Ok(Json(json!({ "history": runs })))
}

#[derive(Debug, Deserialize)]
pub struct SyncPackagesBody {
    #[serde(alias = "type", alias = "source_type")]
    pub source: String,
    pub packages: Vec<String>,
}

/// POST /sync/packages — ad-hoc item sync, tracked as a temp source.
pub async fn sync_packages(
    State(state): State<AppState>,
    Json(body): Json<SyncPackagesBody>,
) -> AppResult<Json<serde_json::Value>> {
    let sync_id = state.sync.sync_packages(&body.source, body.packages).await?;
    Ok(Json(json!({ "sync_id": sync_id, "is_temp_sync": true })))
}

/// GET /sync/packages/<id>/status
pub async fn package_sync_status(
    State(state): State<AppState>,
    Path(sync_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    match state.sync.progress_for(&sync_id).await {
        Some(progress) => return Ok(Json(serde_json::to_value(progress)?)),
        None => {}
    }
    let run = state
        .db
        .get_sync_run(&sync_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no sync run {sync_id}")))?;
    Ok(Json(serde_json::to_value(run)?))
}

/// POST /sync/scan — immediate filesystem reconciliation.
pub async fn scan_now(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let outcome = state.sync.scan_now().await?;
    Ok(Json(json!({
        "scanned": outcome.scanned,
        "added": outcome.added,
        "removed": outcome.removed,
    })))
}
