//! File tree serving, directory listings, byte ranges, and the files API.
//!
//! The fallback handler first tries the mirror adapters
//! ([`super::resolve_mirror_path`]); everything else is served from the
//! base directory: files stream (with `Range` support), directories render
//! an HTML listing (directories first, then names ascending,
//! case-insensitive) or 403 when listings are disabled.

use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stockpile_core::mirrors::MirrorRequest;
use stockpile_model::{DownloadRecord, FileRecord};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use super::record_download_async;
use crate::errors::{AppError, AppResult};
use crate::middleware::client_ip;
use crate::state::AppState;

/// Fallback for everything the API routers did not claim: mirror protocol
/// paths, then the static file tree.
pub async fn fallback_handler(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return AppError::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
            .into_response();
    }

    let ip = client_ip(&request);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if let Some((kind, subpath)) = resolve_mirror(&state, &path) {
        return serve_mirror(&state, &kind, &subpath, request, ip, user_agent).await;
    }
    serve_tree(&state, &path, request.headers(), ip, user_agent).await
}

fn resolve_mirror(state: &AppState, path: &str) -> Option<(String, String)> {
    let kinds = state.registry.kinds();
    super::resolve_mirror_path(path, &kinds).map(|(kind, sub)| (kind, sub.to_string()))
}

async fn serve_mirror(
    state: &AppState,
    kind: &str,
    subpath: &str,
    request: Request,
    ip: String,
    user_agent: String,
) -> Response {
    let headers = request.headers();
    let mirror_request = MirrorRequest {
        subpath,
        accept: headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()),
        range: headers.get(header::RANGE).and_then(|v| v.to_str().ok()),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    };
    let started = Instant::now();

    match state.registry.dispatch(kind, mirror_request).await {
        Ok(mirror_response) => {
            let is_index = mirror_response.content_type.starts_with("text/html");
            if !is_index && mirror_response.status < 400 {
                record_download_async(
                    state,
                    DownloadRecord {
                        duration: started.elapsed().as_secs_f64(),
                        client_ip: ip,
                        user_agent,
                        ..DownloadRecord::success(
                            format!("{kind}/{subpath}"),
                            mirror_response.body.len() as i64,
                        )
                    },
                );
                record_cache_entry_async(
                    state,
                    kind,
                    subpath,
                    mirror_response.body.len() as i64,
                    mirror_response.cache_hit,
                );
            }

            let mut builder = Response::builder()
                .status(mirror_response.status)
                .header(header::CONTENT_TYPE, &mirror_response.content_type)
                .header(header::CONTENT_LENGTH, mirror_response.body.len());
            for (name, value) in &mirror_response.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder
                .body(Body::from(mirror_response.body))
                .unwrap_or_else(|_| {
                    AppError::internal("response build failed").into_response()
                })
        }
        Err(err) => {
            record_download_async(
                state,
                DownloadRecord {
                    client_ip: ip,
                    user_agent,
                    success: false,
                    error_message: Some(err.to_string()),
                    ..DownloadRecord::success(format!("{kind}/{subpath}"), 0)
                },
            );
            AppError::from(err).into_response()
        }
    }
}

/// Maintain the optional cache index: hits bump counters, misses upsert.
/// Keyed by `<kind>/<subpath>` so the row is derivable from the request.
fn record_cache_entry_async(state: &AppState, kind: &str, subpath: &str, size: i64, hit: bool) {
    let db = state.db.clone();
    let cache_key = format!("{kind}/{subpath}");
    let cache_type = kind.to_string();
    tokio::spawn(async move {
        let result = if hit {
            db.record_cache_hit(&cache_key).await
        } else {
            let now = stockpile_model::epoch_now();
            db.upsert_cache_entry(&stockpile_model::CacheRecord {
                cache_key,
                cache_type,
                file_path: None,
                file_size: size,
                file_hash: None,
                hits: 0,
                created_at: now,
                expires_at: None,
                last_hit: now,
            })
            .await
        };
        if let Err(err) = result {
            tracing::debug!(error = %err, "cache index write failed");
        }
    });
}

async fn serve_tree(
    state: &AppState,
    url_path: &str,
    headers: &HeaderMap,
    ip: String,
    user_agent: String,
) -> Response {
    let config = state.config();
    let Some(fs_path) = safe_join(&config.server.base_dir, url_path) else {
        return AppError::forbidden("path escapes the served tree").into_response();
    };

    let metadata = match tokio::fs::metadata(&fs_path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return error_page(StatusCode::NOT_FOUND, url_path);
        }
        Err(err) => return AppError::internal(err.to_string()).into_response(),
    };

    if metadata.is_dir() {
        if !config.server.directory_listing {
            return error_page(StatusCode::FORBIDDEN, url_path);
        }
        return match render_listing(&fs_path, url_path).await {
            Ok(html) => Html(html).into_response(),
            Err(err) => AppError::from(err).into_response(),
        };
    }

    let started = Instant::now();
    let response = serve_file(&fs_path, metadata.len(), headers).await;
    match &response {
        Ok(_) => {
            record_download_async(
                state,
                DownloadRecord {
                    duration: started.elapsed().as_secs_f64(),
                    client_ip: ip,
                    user_agent,
                    ..DownloadRecord::success(
                        url_path.trim_start_matches('/').to_string(),
                        metadata.len() as i64,
                    )
                },
            );
        }
        Err(err) => {
            warn!(path = url_path, error = %err, "file serve failed");
        }
    }
    response.unwrap_or_else(|err| err.into_response())
}

/// Stream a file, honoring a single `bytes=a-b` range.
pub async fn serve_file(
    fs_path: &Path,
    file_size: u64,
    headers: &HeaderMap,
) -> AppResult<Response> {
    let content_type = stockpile_core::mirrors::content_type_for(&fs_path.to_string_lossy());
    let mut file = tokio::fs::File::open(fs_path)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;
    let last_modified = file
        .metadata()
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .map(httpdate::fmt_http_date);

    if let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        return match parse_range(range_header, file_size) {
            Some((start, end)) => {
                file.seek(std::io::SeekFrom::Start(start))
                    .await
                    .map_err(|err| AppError::internal(err.to_string()))?;
                let length = end - start + 1;
                let stream = ReaderStream::new(file.take(length));
                Ok(Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_LENGTH, length)
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {start}-{end}/{file_size}"),
                    )
                    .header(header::ACCEPT_RANGES, "bytes")
                    .body(Body::from_stream(stream))
                    .expect("static response"))
            }
            None => Err(AppError::range_not_satisfiable(format!(
                "invalid range for {file_size}-byte file"
            ))),
        };
    }

    let stream = ReaderStream::new(file);
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, file_size)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(last_modified) = last_modified {
        builder = builder.header(header::LAST_MODIFIED, last_modified);
    }
    Ok(builder
        .body(Body::from_stream(stream))
        .expect("static response"))
}

/// Parse `bytes=a-b` (plus suffix/prefix forms). `None` means 416.
pub fn parse_range(range: &str, file_size: u64) -> Option<(u64, u64)> {
    let spec = range.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    if file_size == 0 {
        return None;
    }

    let (start, end) = if start_str.is_empty() {
        // Suffix form: last N bytes.
        let suffix: u64 = end_str.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        (file_size.saturating_sub(suffix), file_size - 1)
    } else {
        let start: u64 = start_str.parse().ok()?;
        let end = if end_str.is_empty() {
            file_size - 1
        } else {
            end_str.parse::<u64>().ok()?.min(file_size - 1)
        };
        (start, end)
    };

    (start <= end && start < file_size).then_some((start, end))
}

/// Resolve a URL path inside `base`, rejecting traversal.
pub fn safe_join(base: &Path, url_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(url_path.trim_start_matches('/'));
    let mut resolved = base.to_path_buf();
    for component in Path::new(&decoded).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).copied().and_then(hex_val),
                bytes.get(i + 2).copied().and_then(hex_val),
            ) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Directory listing: directories first, then entries ascending by name,
/// case-insensitive.
async fn render_listing(fs_path: &Path, url_path: &str) -> stockpile_core::Result<String> {
    let mut dirs: Vec<String> = Vec::new();
    let mut files: Vec<(String, u64)> = Vec::new();

    let mut entries = tokio::fs::read_dir(fs_path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".meta") || name.starts_with(".tmp.") {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            dirs.push(name);
        } else {
            files.push((name, entry.metadata().await?.len()));
        }
    }
    dirs.sort_by_key(|a| a.to_lowercase());
    files.sort_by_key(|(a, _)| a.to_lowercase());

    let display_path = if url_path.is_empty() { "/" } else { url_path };
    let mut html = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Index of {display_path}</title></head>\n<body><h1>Index of {display_path}</h1><hr><pre>\n"
    );
    if display_path != "/" {
        html.push_str("<a href=\"../\">../</a>\n");
    }
    let base_href = display_path.trim_end_matches('/');
    for dir in &dirs {
        let escaped = html_escape(dir);
        html.push_str(&format!("<a href=\"{base_href}/{escaped}/\">{escaped}/</a>\n"));
    }
    for (file, size) in &files {
        let escaped = html_escape(file);
        html.push_str(&format!(
            "<a href=\"{base_href}/{escaped}\">{escaped}</a>  {}\n",
            stockpile_model::format_size(*size)
        ));
    }
    html.push_str("</pre><hr></body></html>\n");
    Ok(html)
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Minimal HTML error page with the numeric code and a return link.
fn error_page(status: StatusCode, url_path: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{code}</title></head>\n<body><h1>{code} {reason}</h1><p>{path}</p><p><a href=\"/\">Back to index</a></p></body></html>\n",
        code = status.as_u16(),
        reason = status.canonical_reason().unwrap_or(""),
        path = html_escape(url_path),
    );
    (status, Html(body)).into_response()
}

/// GET /file/<path> — single-file download through the API surface; the
/// same range and accounting rules as the tree.
pub async fn get_file(
    State(state): State<AppState>,
    axum::extract::Path(path): axum::extract::Path<String>,
    request: Request,
) -> Response {
    let ip = client_ip(&request);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    serve_tree(&state, &format!("/{path}"), request.headers(), ip, user_agent).await
}

// ---- files API ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let files = state.db.list_files(query.limit.clamp(1, 1000), query.offset.max(0)).await?;
    let (count, bytes) = state.db.file_stats().await?;
    Ok(Json(json!({
        "files": files,
        "total_files": count,
        "total_bytes": bytes,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub async fn search_files(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<serde_json::Value>> {
    if query.q.trim().is_empty() {
        return Err(AppError::bad_request("empty search query"));
    }
    let files = state.db.search_files(query.q.trim(), query.limit.clamp(1, 500)).await?;
    Ok(Json(json!({ "query": query.q, "results": files })))
}

#[derive(Debug, Deserialize)]
pub struct CreateEntryBody {
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
}

/// POST /files — create a directory (or an empty file) inside the tree.
pub async fn create_entry(
    State(state): State<AppState>,
    Json(body): Json<CreateEntryBody>,
) -> AppResult<Json<serde_json::Value>> {
    let relative = body.path.trim_matches('/').to_string();
    if relative.is_empty() {
        return Err(AppError::bad_request("empty path"));
    }
    let config = state.config();
    let fs_path = safe_join(&config.server.base_dir, &relative)
        .ok_or_else(|| AppError::forbidden("path escapes the served tree"))?;

    if body.is_dir {
        tokio::fs::create_dir_all(&fs_path)
            .await
            .map_err(|err| AppError::internal(err.to_string()))?;
    } else {
        if fs_path.exists() {
            return Err(AppError::conflict(format!("{relative} already exists")));
        }
        if let Some(parent) = fs_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AppError::internal(err.to_string()))?;
        }
        tokio::fs::write(&fs_path, b"")
            .await
            .map_err(|err| AppError::internal(err.to_string()))?;
    }

    // Filesystem first, then the record.
    let mut record = FileRecord::new(
        stockpile_core::sync::file_id_for_path(&relative),
        relative.clone(),
        0,
    );
    record.is_dir = body.is_dir;
    record.sync_status = stockpile_model::SyncStatus::Synced;
    state.db.upsert_file(&record).await?;
    Ok(Json(json!({ "created": relative, "is_dir": body.is_dir })))
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    pub new_path: String,
}

/// PUT /file/<path> — move/rename. A move is delete-then-create in the
/// record model, so history stays attached to the old path.
pub async fn move_file(
    State(state): State<AppState>,
    axum::extract::Path(path): axum::extract::Path<String>,
    Json(body): Json<MoveBody>,
) -> AppResult<Json<serde_json::Value>> {
    let from = path.trim_matches('/').to_string();
    let to = body.new_path.trim_matches('/').to_string();
    if to.is_empty() {
        return Err(AppError::bad_request("empty destination"));
    }

    let config = state.config();
    let from_fs = safe_join(&config.server.base_dir, &from)
        .ok_or_else(|| AppError::forbidden("path escapes the served tree"))?;
    let to_fs = safe_join(&config.server.base_dir, &to)
        .ok_or_else(|| AppError::forbidden("destination escapes the served tree"))?;

    let metadata = tokio::fs::metadata(&from_fs)
        .await
        .map_err(|_| AppError::not_found(format!("no such file: {from}")))?;
    if state.db.get_file_by_path(&to).await?.is_some() || to_fs.exists() {
        return Err(AppError::conflict(format!("{to} already exists")));
    }
    if let Some(parent) = to_fs.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| AppError::internal(err.to_string()))?;
    }
    tokio::fs::rename(&from_fs, &to_fs)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;

    state.db.soft_delete_file(&from).await?;
    let mut record = FileRecord::new(
        stockpile_core::sync::file_id_for_path(&to),
        to.clone(),
        metadata.len() as i64,
    );
    record.is_dir = metadata.is_dir();
    record.sync_status = stockpile_model::SyncStatus::Synced;
    state.db.upsert_file(&record).await?;

    Ok(Json(json!({ "moved": from, "to": to })))
}

/// Delete a file: store record first, filesystem second, so a live file is
/// never left without a record.
pub async fn delete_file(
    State(state): State<AppState>,
    axum::extract::Path(path): axum::extract::Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let relative = path.trim_start_matches('/').to_string();
    let existed = state.db.soft_delete_file(&relative).await?;

    let config = state.config();
    let fs_path = safe_join(&config.server.base_dir, &relative)
        .ok_or_else(|| AppError::forbidden("path escapes the served tree"))?;
    let removed = match tokio::fs::remove_file(&fs_path).await {
        Ok(()) => true,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => return Err(AppError::internal(err.to_string())),
    };

    if !existed && !removed {
        return Err(AppError::not_found(format!("no such file: {relative}")));
    }
    Ok(Json(json!({ "deleted": relative, "record": existed, "file": removed })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_first_byte() {
        assert_eq!(parse_range("bytes=0-0", 100), Some((0, 0)));
    }

    #[test]
    fn range_clamps_end_to_file_size() {
        assert_eq!(parse_range("bytes=10-999", 100), Some((10, 99)));
        assert_eq!(parse_range("bytes=10-", 100), Some((10, 99)));
    }

    #[test]
    fn range_suffix_form() {
        assert_eq!(parse_range("bytes=-10", 100), Some((90, 99)));
        assert_eq!(parse_range("bytes=-200", 100), Some((0, 99)));
    }

    #[test]
    fn range_past_end_is_unsatisfiable() {
        assert_eq!(parse_range("bytes=100-", 100), None);
        assert_eq!(parse_range("bytes=150-200", 100), None);
        assert_eq!(parse_range("bytes=5-2", 100), None);
        assert_eq!(parse_range("lines=0-1", 100), None);
    }

    #[test]
    fn safe_join_refuses_traversal() {
        let base = Path::new("/srv/data");
        assert_eq!(
            safe_join(base, "/pypi/simple/flask"),
            Some(PathBuf::from("/srv/data/pypi/simple/flask"))
        );
        assert_eq!(safe_join(base, "/../etc/passwd"), None);
        assert_eq!(safe_join(base, "/a/../../etc"), None);
        // Encoded traversal is decoded before the check.
        assert_eq!(safe_join(base, "/%2e%2e/etc"), None);
    }

    #[test]
    fn percent_decoding_handles_spaces_and_partials() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
