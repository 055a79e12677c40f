//! Download statistics derived from the append-only download ledger.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stockpile_model::epoch_now;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// GET /stats — coarse server statistics.
pub async fn overview(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let (files, bytes) = state.db.file_stats().await?;
    let day = epoch_now() - 86400;
    Ok(Json(json!({
        "total_files": files,
        "total_bytes": bytes,
        "total_size": stockpile_model::format_size(bytes.max(0) as u64),
        "downloads_24h": state.db.downloads_since(day).await?,
        "downloads_total": state.db.downloads_since(0).await?,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
    /// Bucket size: `hour` or `day`.
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_hours() -> i64 {
    24
}

fn default_period() -> String {
    "hour".to_string()
}

/// GET /stats/download-trend — bucketed counts over a window.
pub async fn download_trend(
    State(state): State<AppState>,
    Query(query): Query<TrendQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let bucket_secs = match query.period.as_str() {
        "hour" => 3600,
        "day" => 86400,
        other => return Err(AppError::bad_request(format!("unknown period: {other}"))),
    };
    let since = epoch_now() - query.hours.clamp(1, 24 * 90) * 3600;
    let trend = state.db.download_trend(since, bucket_secs).await?;
    let points: Vec<serde_json::Value> = trend
        .into_iter()
        .map(|(bucket, count)| json!({ "bucket": bucket, "count": count }))
        .collect();
    Ok(Json(json!({ "period": query.period, "points": points })))
}

#[derive(Debug, Deserialize)]
pub struct RankQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_rank_hours")]
    pub hours: i64,
}

fn default_limit() -> i64 {
    20
}

fn default_rank_hours() -> i64 {
    24 * 7
}

/// GET /stats/rank — most-downloaded paths.
pub async fn rank(
    State(state): State<AppState>,
    Query(query): Query<RankQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let since = epoch_now() - query.hours.clamp(1, 24 * 365) * 3600;
    let top = state.db.top_downloads(since, query.limit.clamp(1, 100)).await?;
    let entries: Vec<serde_json::Value> = top
        .into_iter()
        .map(|(path, count, last)| json!({ "path": path, "count": count, "last_download": last }))
        .collect();
    Ok(Json(json!({ "rank": entries })))
}

/// GET /activity — most recent downloads, newest first.
pub async fn activity(
    State(state): State<AppState>,
    Query(query): Query<RankQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let recent = state.db.recent_downloads(query.limit.clamp(1, 200)).await?;
    Ok(Json(json!({ "activity": recent })))
}
