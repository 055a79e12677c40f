//! Health and failover endpoints, plus the server liveness probe.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// GET /health — liveness with per-dependency checks.
pub async fn server_health(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let mut checks = serde_json::Map::new();
    let mut healthy = true;

    match state.db.ping().await {
        Ok(()) => {
            checks.insert("database".into(), json!({ "status": "healthy", "backend": state.db.backend_name() }));
        }
        Err(err) => {
            healthy = false;
            checks.insert("database".into(), json!({ "status": "unhealthy", "error": err.to_string() }));
        }
    }
    checks.insert(
        "store".into(),
        json!({ "status": "healthy", "base_dir": state.store.base().display().to_string() }),
    );
    checks.insert(
        "lifecycle".into(),
        json!({
            "state": state.lifecycle.state(),
            "pending_requests": state.lifecycle.pending_requests(),
        }),
    );

    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": checks,
    });
    if healthy {
        Ok(Json(body))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(body)))
    }
}

/// GET /api/v2/health — upstream probe summary.
pub async fn upstream_health(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let summary = state.health.summary().await;
    Ok(Json(json!({
        "summary": summary,
        "active_sources": state.failover.active_sources().await,
    })))
}

/// GET /health/sources — every probed source with rolling stats.
pub async fn health_sources(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "sources": state.health.all_results().await })))
}

/// POST /health/check/<name> — probe one source immediately.
pub async fn check_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let probe = state
        .failover
        .probes()
        .into_iter()
        .find(|(_, source, _)| source == &name)
        .ok_or_else(|| AppError::not_found(format!("no health-checked source named {name}")))?;
    let result = state.health.check_source(&probe.1, &probe.2).await;
    Ok(Json(serde_json::to_value(result)?))
}

/// GET /health/failover — active sources and swap history.
pub async fn failover_status(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(json!({
        "active_sources": state.failover.active_sources().await,
        "history": state.failover.history(20).await,
    })))
}

/// POST /health/failover/<type> — manual re-evaluation from the top of the
/// priority list.
pub async fn trigger_failover(
    State(state): State<AppState>,
    Path(mirror_type): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    match state.failover.reevaluate(&mirror_type, &state.health).await {
        Some(event) => Ok(Json(serde_json::to_value(event)?)),
        None => Ok(Json(json!({
            "mirror_type": mirror_type,
            "changed": false,
        }))),
    }
}
