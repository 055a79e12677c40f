//! Shared fixtures: a server instance over a temp tree and sqlite file,
//! plus a counting fake upstream.

// Each integration test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_test::TestServer;
use stockpile_config::{Config, MirrorEntry, UpstreamSource};
use stockpile_server::{AppState, build_state, create_router};

pub const WHEEL_HASH: &str = "ec/f9/7f9263c5695f4bd0023734af91bedb2ff8209e8de6ead162f35d8dc762fd";
pub const WHEEL: &str = "flask-3.1.2-py3-none-any.whl";

/// Per-path request counters for asserting upstream traffic.
#[derive(Debug, Default)]
pub struct UpstreamCounters {
    pub simple: AtomicUsize,
    pub artifact: AtomicUsize,
    pub release: AtomicUsize,
    pub inrelease: AtomicUsize,
}

/// A fake upstream speaking just enough PyPI and APT for the tests.
pub async fn spawn_upstream() -> (String, Arc<UpstreamCounters>) {
    let counters = Arc::new(UpstreamCounters::default());
    let handler_counters = counters.clone();

    let app = Router::new().fallback(move |request: Request| {
        let counters = handler_counters.clone();
        async move { upstream_response(&counters, request).await }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), counters)
}

async fn upstream_response(counters: &UpstreamCounters, request: Request) -> Response {
    let path = request.uri().path().to_string();
    match path.as_str() {
        "/simple/flask/" => {
            counters.simple.fetch_add(1, Ordering::SeqCst);
            let html = format!(
                "<!DOCTYPE html><html><body>\
                 <a href=\"../../packages/{WHEEL_HASH}/{WHEEL}#sha256=deadbeef\">{WHEEL}</a>\
                 </body></html>"
            );
            ([(header::CONTENT_TYPE, "text/html")], html).into_response()
        }
        path if path == format!("/packages/{WHEEL_HASH}/{WHEEL}") => {
            counters.artifact.fetch_add(1, Ordering::SeqCst);
            // Slow enough that concurrent misses overlap.
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Body::from(vec![0x50u8; 4096]).into_response()
        }
        "/ubuntu/dists/jammy/Release" => {
            counters.release.fetch_add(1, Ordering::SeqCst);
            "Origin: Ubuntu\nSuite: jammy\nCodename: jammy\n".into_response()
        }
        "/ubuntu/dists/jammy/InRelease" => {
            counters.inrelease.fetch_add(1, Ordering::SeqCst);
            StatusCode::NOT_FOUND.into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

pub struct TestContext {
    pub server: TestServer,
    pub state: AppState,
    pub upstream: String,
    pub counters: Arc<UpstreamCounters>,
    // Held for the lifetime of the test.
    _dir: tempfile::TempDir,
}

/// Full server over a temp base dir, sqlite file, and the fake upstream.
pub async fn start_server() -> TestContext {
    let dir = tempfile::tempdir().unwrap();
    let (upstream, counters) = spawn_upstream().await;

    let mut config = Config::default();
    config.server.base_dir = dir.path().join("data");
    config.server.state_dir = dir.path().join("state");
    config.server.access_log = dir.path().join("state/access.log");
    config.server.max_upload_size = 1024 * 1024;
    config.database.path = dir.path().join("state/test.db");
    config.auth.secret_key = "integration-secret".to_string();
    config.sync.enabled = false;
    config.health.enabled = false;
    config.monitor.enabled = false;

    for kind in ["pypi", "apt"] {
        config.mirrors.entries.insert(
            kind.to_string(),
            MirrorEntry {
                upstream_url: Some(upstream.clone()),
                sources: vec![UpstreamSource {
                    name: format!("{kind}-test"),
                    url: upstream.clone(),
                }],
                ..MirrorEntry::default()
            },
        );
    }

    let state = build_state(config, None).await.unwrap();
    let server = TestServer::new(create_router(state.clone())).unwrap();
    TestContext {
        server,
        state,
        upstream,
        counters,
        _dir: dir,
    }
}

/// Write a file directly into the served tree.
pub fn seed_file(state: &AppState, relative: &str, bytes: &[u8]) -> PathBuf {
    let path = state.config().server.base_dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, bytes).unwrap();
    path
}
