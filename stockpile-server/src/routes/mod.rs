//! Router assembly. The versioned API routers mount under `/api/v1` and
//! `/api/v2` (v2 is a superset); everything unclaimed falls through to the
//! mirror/file-tree handler. Layer order, outer to inner: CORS, trace, the
//! entry gate (lifecycle + allow-list + rate limit + access log), then the
//! per-router auth gate.

pub mod v1;
pub mod v2;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{files, health};
use crate::middleware;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Leave headroom above the upload limit so the upload handler, not the
    // generic body limit, produces the 413 (with its precise message) and
    // cleans up its temp file.
    let max_body = state.config().server.max_upload_size + 4 * 1024 * 1024;
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health::server_health))
        .nest("/api/v1", v1::router(state.clone()))
        .nest("/api/v2", v2::router(state.clone()))
        .fallback(files::fallback_handler)
        .layer(axum::extract::DefaultBodyLimit::max(max_body as usize))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::entry_gate,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ping() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
