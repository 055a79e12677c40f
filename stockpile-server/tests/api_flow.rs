//! Control-API behaviour: auth gate, file lifecycle, ranges, restart.

mod support;

use axum::http::{StatusCode, header};
use axum_test::multipart::{MultipartForm, Part};
use support::{seed_file, start_server};

#[tokio::test]
async fn liveness_endpoints_answer() {
    let ctx = start_server().await;
    ctx.server.get("/ping").await.assert_status(StatusCode::OK);

    let health = ctx.server.get("/health").await;
    health.assert_status(StatusCode::OK);
    let body: serde_json::Value = health.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"]["status"], "healthy");
}

#[tokio::test]
async fn protected_endpoints_require_credentials() {
    let ctx = start_server().await;

    let denied = ctx.server.get("/api/v2/config").await;
    denied.assert_status(StatusCode::UNAUTHORIZED);
    assert!(denied.headers().contains_key(header::WWW_AUTHENTICATE));

    let (_key, token) = ctx
        .state
        .auth
        .create_admin_key("test", "admin", None, vec![], vec![]);
    let allowed = ctx
        .server
        .get("/api/v2/config")
        .add_header("x-api-key", token.as_str())
        .await;
    allowed.assert_status(StatusCode::OK);

    // Secrets never appear in config reads.
    let body = allowed.text();
    assert!(!body.contains("integration-secret"));

    // Read-only statistics stay public.
    ctx.server.get("/api/v2/stats").await.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn upload_then_list_then_delete_round_trips() {
    let ctx = start_server().await;
    let (_key, token) = ctx
        .state
        .auth
        .create_admin_key("uploader", "admin", None, vec![], vec![]);

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"hello stockpile".to_vec()).file_name("hello.txt"),
    );
    let uploaded = ctx
        .server
        .post("/api/v2/upload")
        .add_header("x-api-key", token.as_str())
        .multipart(form)
        .await;
    uploaded.assert_status(StatusCode::OK);
    let body: serde_json::Value = uploaded.json();
    assert_eq!(body["uploaded"][0]["path"], "uploads/hello.txt");
    assert_eq!(body["uploaded"][0]["size"], 15);

    // Listing the parent directory includes the file.
    let listing = ctx.server.get("/uploads/").await;
    listing.assert_status(StatusCode::OK);
    assert!(listing.text().contains("hello.txt"));

    // The record is queryable through the files API.
    let files = ctx.server.get("/api/v2/files").await;
    let body: serde_json::Value = files.json();
    assert!(
        body["files"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f["path"] == "uploads/hello.txt")
    );

    // Download the payload through the tree.
    let fetched = ctx.server.get("/uploads/hello.txt").await;
    fetched.assert_status(StatusCode::OK);
    assert_eq!(fetched.text(), "hello stockpile");

    // Delete: record first, then the file; both gone afterwards.
    let deleted = ctx
        .server
        .delete("/api/v2/file/uploads/hello.txt")
        .add_header("x-api-key", token.as_str())
        .await;
    deleted.assert_status(StatusCode::OK);
    ctx.server
        .get("/uploads/hello.txt")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_upload_is_rejected_with_413() {
    let ctx = start_server().await;
    let (_key, token) = ctx
        .state
        .auth
        .create_admin_key("uploader", "admin", None, vec![], vec![]);

    // Larger than the 1 MiB limit configured by the fixture.
    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(vec![0u8; 2 * 1024 * 1024]).file_name("big.bin"),
    );
    let response = ctx
        .server
        .post("/api/v2/upload")
        .add_header("x-api-key", token.as_str())
        .multipart(form)
        .await;
    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);

    // The rolled-back temp file is not left behind.
    let uploads = ctx.state.config().server.base_dir.join("uploads");
    if uploads.exists() {
        let leftovers: Vec<_> = std::fs::read_dir(&uploads).unwrap().collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }
}

#[tokio::test]
async fn range_requests_honor_boundaries() {
    let ctx = start_server().await;
    seed_file(&ctx.state, "blobs/data.bin", b"0123456789");

    let first_byte = ctx
        .server
        .get("/blobs/data.bin")
        .add_header(header::RANGE, "bytes=0-0")
        .await;
    first_byte.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        first_byte.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 0-0/10"
    );
    assert_eq!(first_byte.text(), "0");

    let tail = ctx
        .server
        .get("/blobs/data.bin")
        .add_header(header::RANGE, "bytes=5-")
        .await;
    tail.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(tail.text(), "56789");

    let unsatisfiable = ctx
        .server
        .get("/blobs/data.bin")
        .add_header(header::RANGE, "bytes=10-")
        .await;
    unsatisfiable.assert_status(StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn login_mints_a_session_that_authenticates() {
    let ctx = start_server().await;
    let hash = ctx.state.auth.hash_password("swordfish-9").unwrap();
    ctx.state
        .db
        .create_user(&stockpile_model::User {
            username: "alice".to_string(),
            password_hash: hash,
            role: "admin".to_string(),
            email: None,
            last_login: None,
            login_count: 0,
            failed_attempts: 0,
            locked_until: None,
            enabled: true,
            created_at: stockpile_model::epoch_now(),
        })
        .await
        .unwrap();

    let denied = ctx
        .server
        .post("/api/v2/user/login")
        .json(&serde_json::json!({"username": "alice", "password": "wrong"}))
        .await;
    denied.assert_status(StatusCode::UNAUTHORIZED);

    let login = ctx
        .server
        .post("/api/v2/user/login")
        .json(&serde_json::json!({"username": "alice", "password": "swordfish-9"}))
        .await;
    login.assert_status(StatusCode::OK);
    let body: serde_json::Value = login.json();
    let token = body["token"].as_str().unwrap().to_string();

    // The session token works as a bearer credential on protected reads.
    let logs = ctx
        .server
        .get("/api/v2/user/login-logs")
        .add_header(header::AUTHORIZATION, format!("Bearer {token}"))
        .await;
    logs.assert_status(StatusCode::OK);
    let body: serde_json::Value = logs.json();
    let statuses: Vec<&str> = body["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["status"].as_str().unwrap())
        .collect();
    assert!(statuses.contains(&"success"));
    assert!(statuses.contains(&"failed"));
}

#[tokio::test]
async fn restart_staging_reports_pending_requests() {
    let ctx = start_server().await;
    let (_key, token) = ctx
        .state
        .auth
        .create_admin_key("ops", "admin", None, vec![], vec![]);

    let staged = ctx
        .server
        .post("/api/v2/server/restart?strategy=graceful")
        .add_header("x-api-key", token.as_str())
        .await;
    staged.assert_status(StatusCode::OK);
    let body: serde_json::Value = staged.json();
    assert_eq!(body["staged"]["strategy"], "graceful");

    let pending = ctx
        .server
        .get("/api/v2/server/restart/pending")
        .add_header("x-api-key", token.as_str())
        .await;
    let body: serde_json::Value = pending.json();
    assert_eq!(body["pending_restart"]["strategy"], "graceful");

    // Cancel keeps the server running.
    let cancelled = ctx
        .server
        .delete("/api/v2/server/restart/pending")
        .add_header("x-api-key", token.as_str())
        .await;
    cancelled.assert_status(StatusCode::OK);
    ctx.server.get("/ping").await.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn downloads_are_recorded_for_stats() {
    let ctx = start_server().await;
    seed_file(&ctx.state, "blobs/counted.bin", b"abcdef");

    ctx.server.get("/blobs/counted.bin").await.assert_status(StatusCode::OK);
    ctx.server.get("/blobs/counted.bin").await.assert_status(StatusCode::OK);
    // Recording is async fire-and-forget; give it a beat.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let stats = ctx.server.get("/api/v2/stats").await;
    let body: serde_json::Value = stats.json();
    assert!(body["downloads_total"].as_i64().unwrap() >= 2);

    let rank = ctx.server.get("/api/v2/stats/rank").await;
    let body: serde_json::Value = rank.json();
    assert!(
        body["rank"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["path"] == "blobs/counted.bin")
    );
}
