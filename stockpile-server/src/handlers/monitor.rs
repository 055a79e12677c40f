//! Monitoring endpoints over the sampler and its persisted history.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stockpile_model::epoch_now;

use crate::errors::AppResult;
use crate::state::AppState;

/// GET /monitor/realtime — assembled synchronously on request.
pub async fn realtime(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(state.monitor.snapshot())?))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    1
}

/// GET /monitor/history?hours=N — persisted samples in the window.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let hours = query.hours.clamp(1, 24 * 30);
    let since = epoch_now() - hours * 3600;
    let samples = state.db.monitor_samples_since(since).await?;
    Ok(Json(json!({ "hours": hours, "samples": samples })))
}

/// GET /monitor/detailed — realtime snapshot plus aggregates over the
/// last hour of persisted samples.
pub async fn detailed(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let snapshot = state.monitor.snapshot();
    let samples = state.db.monitor_samples_since(epoch_now() - 3600).await?;

    let count = samples.len() as f64;
    let (mut avg_cpu, mut avg_mem, mut peak_cpu) = (0.0f64, 0.0f64, 0.0f64);
    for sample in &samples {
        avg_cpu += sample.cpu_percent;
        avg_mem += sample.memory_percent;
        peak_cpu = peak_cpu.max(sample.cpu_percent);
    }
    if count > 0.0 {
        avg_cpu /= count;
        avg_mem /= count;
    }

    Ok(Json(json!({
        "realtime": snapshot,
        "last_hour": {
            "samples": samples.len(),
            "avg_cpu_percent": avg_cpu,
            "avg_memory_percent": avg_mem,
            "peak_cpu_percent": peak_cpu,
        },
    })))
}
