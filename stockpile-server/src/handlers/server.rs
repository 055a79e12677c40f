//! Server info and restart lifecycle endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stockpile_core::lifecycle::RestartStrategy;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// GET / (api root) — identity and coarse status.
pub async fn server_info(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let (files, bytes) = state.db.file_stats().await?;
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0) as u64;
    Ok(Json(json!({
        "name": "stockpile",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at.to_rfc3339(),
        "uptime_secs": uptime_secs,
        "uptime": humantime::format_duration(std::time::Duration::from_secs(uptime_secs)).to_string(),
        "database": state.db.backend_name(),
        "mirrors": state.registry.kinds(),
        "files": files,
        "bytes": bytes,
        "state": state.lifecycle.state(),
        "pending_requests": state.lifecycle.pending_requests(),
    })))
}

/// GET /server/restart — current restart state.
pub async fn restart_status(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({
        "state": state.lifecycle.state(),
        "pending_requests": state.lifecycle.pending_requests(),
        "pending_restart": state.lifecycle.pending_restart(),
        "graceful_timeout_secs": state.lifecycle.graceful_timeout().as_secs(),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RestartQuery {
    pub strategy: Option<String>,
}

/// POST /server/restart — stage a restart; nothing stops until confirm.
pub async fn prepare_restart(
    State(state): State<AppState>,
    Query(query): Query<RestartQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let strategy = parse_strategy(&state, query.strategy.as_deref())?;
    let pending = state.lifecycle.prepare_restart(strategy);
    Ok(Json(json!({
        "staged": pending,
        "pending_requests": state.lifecycle.pending_requests(),
        "note": "POST /server/restart/confirm to execute",
    })))
}

/// POST /server/restart/confirm — drain and exit. The response is sent
/// before the server stops accepting work.
pub async fn confirm_restart(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let fallback = parse_strategy(&state, None)?;
    let pending = state.lifecycle.pending_requests();
    let lifecycle = state.lifecycle.clone();
    tokio::spawn(async move {
        // Let this response flush before the drain begins.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        lifecycle.confirm_restart(fallback).await;
    });
    Ok(Json(json!({
        "restarting": true,
        "pending_requests": pending,
    })))
}

/// POST /server/restart/immediate — skip the drain.
pub async fn immediate_restart(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let lifecycle = state.lifecycle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        lifecycle.shutdown(RestartStrategy::Immediate).await;
    });
    Ok(Json(json!({ "restarting": true, "strategy": "immediate" })))
}

/// GET /server/restart/pending — staged restart plus in-flight count.
pub async fn pending_restart(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({
        "pending_restart": state.lifecycle.pending_restart(),
        "pending_requests": state.lifecycle.pending_requests(),
    })))
}

/// DELETE /server/restart/pending — cancel a staged restart.
pub async fn cancel_restart(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "cancelled": state.lifecycle.cancel_pending() })))
}

pub async fn restart_history(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "history": state.lifecycle.history() })))
}

/// GET /server/restart/config — lifecycle tuning in effect.
pub async fn restart_config(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let config = state.config();
    Ok(Json(json!({
        "graceful_timeout_secs": config.lifecycle.graceful_timeout_secs,
        "default_strategy": config.lifecycle.default_strategy,
    })))
}

fn parse_strategy(state: &AppState, requested: Option<&str>) -> Result<RestartStrategy, AppError> {
    let name = match requested {
        Some(name) => name.to_string(),
        None => state.config().lifecycle.default_strategy.clone(),
    };
    name.parse().map_err(AppError::from)
}
