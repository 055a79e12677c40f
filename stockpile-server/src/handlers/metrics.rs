//! Plaintext metrics in the Prometheus exposition format, rendered by
//! hand. The collector scrape endpoint itself (service discovery, relabel
//! rules) is external; this is just the text surface.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use stockpile_model::epoch_now;

use crate::errors::AppError;
use crate::state::AppState;

pub async fn metrics(State(state): State<AppState>) -> Response {
    match render(&state).await {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

async fn render(state: &AppState) -> stockpile_core::Result<String> {
    let mut out = String::with_capacity(2048);

    let (files, bytes) = state.db.file_stats().await?;
    gauge(&mut out, "stockpile_files_total", "Live file records", files as f64);
    gauge(&mut out, "stockpile_files_bytes", "Bytes across live files", bytes as f64);

    counter(
        &mut out,
        "stockpile_downloads_total",
        "Downloads recorded since the beginning",
        state.db.downloads_since(0).await? as f64,
    );
    counter(
        &mut out,
        "stockpile_downloads_24h",
        "Downloads recorded in the last day",
        state.db.downloads_since(epoch_now() - 86400).await? as f64,
    );

    out.push_str("# HELP stockpile_cache_files Cached payloads per mirror\n");
    out.push_str("# TYPE stockpile_cache_files gauge\n");
    out.push_str("# HELP stockpile_cache_bytes Cached bytes per mirror\n");
    out.push_str("# TYPE stockpile_cache_bytes gauge\n");
    let mut mirrors: Vec<_> = state.registry.total_stats().await.into_iter().collect();
    mirrors.sort_by(|a, b| a.0.cmp(&b.0));
    for (kind, stats) in mirrors {
        out.push_str(&format!(
            "stockpile_cache_files{{mirror=\"{kind}\"}} {}\n",
            stats.files
        ));
        out.push_str(&format!(
            "stockpile_cache_bytes{{mirror=\"{kind}\"}} {}\n",
            stats.bytes
        ));
    }

    gauge(
        &mut out,
        "stockpile_pending_requests",
        "Requests currently in flight",
        state.lifecycle.pending_requests() as f64,
    );
    gauge(
        &mut out,
        "stockpile_uptime_seconds",
        "Seconds since startup",
        (chrono::Utc::now() - state.started_at).num_seconds() as f64,
    );

    let summary = state.health.summary().await;
    gauge(
        &mut out,
        "stockpile_upstreams_healthy",
        "Upstream sources currently healthy",
        summary.healthy as f64,
    );
    gauge(
        &mut out,
        "stockpile_upstreams_unhealthy",
        "Upstream sources currently unhealthy",
        summary.unhealthy as f64,
    );

    Ok(out)
}

fn gauge(out: &mut String, name: &str, help: &str, value: f64) {
    out.push_str(&format!(
        "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
    ));
}

fn counter(out: &mut String, name: &str, help: &str, value: f64) {
    out.push_str(&format!(
        "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
    ));
}
