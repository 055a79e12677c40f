//! Mirror configuration endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use stockpile_config::MirrorEntry;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// GET /mirrors — every configured ecosystem with its upstream and usage.
pub async fn list_mirrors(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let config = state.config();
    let stats = state.registry.total_stats().await;
    let active = state.failover.active_sources().await;

    let mut mirrors = Vec::new();
    for (kind, entry) in &config.mirrors.entries {
        let usage = stats.get(kind).copied().unwrap_or_default();
        mirrors.push(json!({
            "type": kind,
            "enabled": entry.enabled,
            "upstream_url": entry.upstream_url
                .clone()
                .or_else(|| stockpile_core::mirrors::default_upstream(kind).map(String::from)),
            "sources": entry.sources,
            "active_source": active.get(kind),
            "cache_files": usage.files,
            "cache_bytes": usage.bytes,
            "cache_size": stockpile_model::format_size(usage.bytes),
        }));
    }
    Ok(Json(json!({ "mirrors": mirrors })))
}

pub async fn get_mirror(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let config = state.config();
    let entry = config
        .mirrors
        .entries
        .get(&name)
        .ok_or_else(|| AppError::not_found(format!("no mirror named {name}")))?;
    let stats = state
        .registry
        .get(&name)
        .map(|adapter| async move { adapter.cache_stats().await });
    let usage = match stats {
        Some(fut) => fut.await.unwrap_or_default(),
        None => Default::default(),
    };
    Ok(Json(json!({
        "type": name,
        "config": entry,
        "cache_files": usage.files,
        "cache_bytes": usage.bytes,
    })))
}

/// POST /mirrors — create (or replace) a mirror from a body that names its
/// ecosystem: `{"type": "...", ...entry}`.
pub async fn create_mirror(
    State(state): State<AppState>,
    Json(mut body): Json<serde_json::Value>,
) -> AppResult<Json<serde_json::Value>> {
    let name = body
        .as_object_mut()
        .and_then(|map| map.remove("type").or_else(|| map.remove("name")))
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| AppError::bad_request("mirror needs a \"type\""))?;
    let entry: MirrorEntry = serde_json::from_value(body)
        .map_err(|err| AppError::bad_request(format!("invalid mirror config: {err}")))?;
    persist_mirror_patch(&state, &name, Some(serde_json::to_value(&entry)?)).await?;
    Ok(Json(json!({ "created": name })))
}

/// POST /mirrors and PUT /mirrors/<name> both persist through the settings
/// file so the change survives a restart; adapters pick it up on reload.
pub async fn put_mirror(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(entry): Json<MirrorEntry>,
) -> AppResult<Json<serde_json::Value>> {
    persist_mirror_patch(&state, &name, Some(serde_json::to_value(&entry)?)).await?;
    Ok(Json(json!({ "updated": name, "note": "restart or reload to apply" })))
}

pub async fn delete_mirror(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.config().mirrors.entries.contains_key(&name) {
        return Err(AppError::not_found(format!("no mirror named {name}")));
    }
    persist_mirror_patch(&state, &name, Some(json!({ "enabled": false }))).await?;
    Ok(Json(json!({ "disabled": name })))
}

pub async fn enable_mirror(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    persist_mirror_patch(&state, &name, Some(json!({ "enabled": true }))).await?;
    Ok(Json(json!({ "enabled": name })))
}

/// POST /mirrors/<name>/refresh — drop the ecosystem's cached entries so
/// the next requests re-fetch.
pub async fn refresh_mirror(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    if state.registry.get(&name).is_none() {
        return Err(AppError::not_found(format!("no mirror named {name}")));
    }
    let removed = state.store.purge_namespace(&name).await?;
    Ok(Json(json!({ "refreshed": name, "entries_removed": removed })))
}

async fn persist_mirror_patch(
    state: &AppState,
    name: &str,
    entry: Option<serde_json::Value>,
) -> AppResult<()> {
    let Some(settings_path) = state.settings_path.clone() else {
        return Err(AppError::conflict(
            "no settings file configured; mirror changes cannot persist",
        ));
    };
    let mut entries = serde_json::Map::new();
    entries.insert(name.to_string(), entry.unwrap_or(serde_json::Value::Null));
    let patch = json!({ "mirrors": { "entries": entries } });
    let reloaded = stockpile_config::Config::save_patch(&settings_path, patch)?;
    state.swap_config(reloaded);
    Ok(())
}
