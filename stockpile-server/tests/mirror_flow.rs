//! End-to-end mirror behaviour against a local fake upstream.

mod support;

use std::sync::atomic::Ordering;

use axum::http::StatusCode;
use futures::future::join_all;
use support::{WHEEL, WHEEL_HASH, start_server};

#[tokio::test]
async fn pypi_index_is_rewritten_and_artifact_caches() {
    let ctx = start_server().await;

    // Cold index: fetched from upstream and rewritten to local links.
    let response = ctx
        .server
        .get("/simple/flask/")
        .add_header(axum::http::header::ACCEPT, "text/html")
        .await;
    response.assert_status(StatusCode::OK);
    let html = response.text();
    assert!(
        html.contains(&format!("/packages/{WHEEL_HASH}/{WHEEL}#egg=flask-3.1.2")),
        "rewritten link missing from: {html}"
    );
    assert!(!html.contains(&ctx.upstream), "upstream URL leaked into index");

    // Cold artifact: one upstream fetch.
    let artifact_path = format!("/packages/{WHEEL_HASH}/{WHEEL}");
    let first = ctx.server.get(&artifact_path).await;
    first.assert_status(StatusCode::OK);
    assert_eq!(first.as_bytes().len(), 4096);
    assert_eq!(ctx.counters.artifact.load(Ordering::SeqCst), 1);

    // Warm artifact: served from the store, no second upstream call.
    let second = ctx.server.get(&artifact_path).await;
    second.assert_status(StatusCode::OK);
    assert_eq!(second.as_bytes().to_vec(), first.as_bytes().to_vec());
    assert_eq!(ctx.counters.artifact.load(Ordering::SeqCst), 1);

    // Sidecar invariant: payload exists and its size matches the sidecar.
    let payload = ctx
        .state
        .store
        .payload_path("pypi", &format!("packages/{WHEEL_HASH}/{WHEEL}"))
        .unwrap();
    assert!(payload.exists());
    let sidecar: serde_json::Value = serde_json::from_slice(
        &std::fs::read(payload.with_file_name(format!("{WHEEL}.meta"))).unwrap(),
    )
    .unwrap();
    assert_eq!(sidecar["size"], 4096);
    assert_eq!(std::fs::metadata(&payload).unwrap().len(), 4096);
}

#[tokio::test]
async fn pypi_json_flavor_negotiates_by_accept() {
    let ctx = start_server().await;

    let response = ctx
        .server
        .get("/simple/flask/")
        .add_header(axum::http::header::ACCEPT, "application/vnd.pypi.simple.v1+json")
        .await;
    response.assert_status(StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["name"], "flask");
    assert_eq!(body["meta"]["api-version"], "1.0");
    let url = body["files"][0]["url"].as_str().unwrap();
    assert_eq!(url, format!("/packages/{WHEEL_HASH}/{WHEEL}"));
    assert!(!url.contains('#'), "JSON urls must not carry fragments");
}

#[tokio::test]
async fn concurrent_cold_requests_share_one_upstream_fetch() {
    let ctx = start_server().await;
    let artifact_path = format!("/packages/{WHEEL_HASH}/{WHEEL}");

    let requests = (0..20).map(|_| std::future::IntoFuture::into_future(ctx.server.get(&artifact_path)));
    let responses = join_all(requests).await;

    let first_body = responses[0].as_bytes().to_vec();
    for response in &responses {
        response.assert_status(StatusCode::OK);
        assert_eq!(response.as_bytes().to_vec(), first_body);
    }
    assert_eq!(
        ctx.counters.artifact.load(Ordering::SeqCst),
        1,
        "thundering herd must collapse to one upstream GET"
    );
}

#[tokio::test]
async fn apt_inrelease_is_synthesized_when_upstream_lacks_it() {
    let ctx = start_server().await;

    let response = ctx.server.get("/ubuntu/dists/jammy/InRelease").await;
    response.assert_status(StatusCode::OK);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    let body = response.text();
    assert!(body.starts_with("# Note: This is a synthesized InRelease"));
    assert!(body.contains("Origin: Ubuntu"));
    assert!(body.contains("Suite: jammy"));
    assert_eq!(ctx.counters.inrelease.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn upstream_404_maps_to_404_and_is_not_cached() {
    let ctx = start_server().await;

    let response = ctx.server.get("/simple/no-such-package/").await;
    response.assert_status(StatusCode::NOT_FOUND);

    // Nothing landed in the cache for the failed lookup.
    assert!(
        ctx.state
            .store
            .lookup("pypi", "simple/no-such-package")
            .await
            .unwrap()
            .is_none()
    );
}
