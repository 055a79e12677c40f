//! Multipart upload, streamed to a temp file and renamed into place.
//!
//! Oversized uploads are refused from `Content-Length` before any body
//! bytes are consumed (413). A disconnect or short write mid-stream rolls
//! the temp file back and reports the mismatch; no file record is created
//! for a failed upload.

use axum::extract::{Multipart, Query, State};
use axum::http::HeaderMap;
use axum::http::header;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use stockpile_core::sync::file_id_for_path;
use stockpile_model::{FileRecord, SyncStatus, epoch_now};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::files::safe_join;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Target directory inside the tree; defaults to `uploads/`.
    #[serde(default)]
    pub path: Option<String>,
}

pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    let config = state.config();
    let max_size = config.server.max_upload_size;

    // Reject from the envelope size before reading any body bytes.
    if let Some(declared) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if declared > max_size {
            return Err(AppError::payload_too_large(format!(
                "upload of {declared} bytes exceeds the {max_size} byte limit"
            )));
        }
    }

    let target_dir = query.path.unwrap_or_else(|| "uploads".to_string());
    let mut stored = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {err}")))?
    {
        let Some(filename) = field.file_name().map(sanitize_filename) else {
            continue;
        };
        if filename.is_empty() {
            return Err(AppError::bad_request("upload with empty filename"));
        }

        let relative = format!("{}/{}", target_dir.trim_matches('/'), filename);
        let fs_path = safe_join(&config.server.base_dir, &relative)
            .ok_or_else(|| AppError::forbidden("upload path escapes the served tree"))?;
        if let Some(parent) = fs_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AppError::internal(err.to_string()))?;
        }

        let tmp_path = fs_path.with_file_name(format!(".tmp.{}", epoch_now()));
        let mut written: u64 = 0;
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|err| AppError::internal(err.to_string()))?;

        // Stream chunks; any failure rolls the temp file back.
        let stream_result: Result<(), AppError> = async {
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|err| AppError::internal(format!("upload size mismatch: {err}")))?
            {
                written += chunk.len() as u64;
                if written > max_size {
                    return Err(AppError::payload_too_large(format!(
                        "upload exceeds the {max_size} byte limit"
                    )));
                }
                file.write_all(&chunk).await.map_err(map_disk_err)?;
            }
            file.sync_all().await.map_err(map_disk_err)?;
            Ok(())
        }
        .await;

        if let Err(err) = stream_result {
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                warn!(path = %tmp_path.display(), error = %cleanup, "temp cleanup failed");
            }
            return Err(err);
        }
        drop(file);

        tokio::fs::rename(&tmp_path, &fs_path)
            .await
            .map_err(|err| AppError::internal(err.to_string()))?;

        // Filesystem first, then the store, so a record never refers to a
        // missing file. A store failure here is repaired by the next scan.
        let mut record = FileRecord::new(file_id_for_path(&relative), relative.clone(), written as i64);
        record.sync_status = SyncStatus::Synced;
        record.mime_type = Some(
            stockpile_core::mirrors::content_type_for(&relative).to_string(),
        );
        if let Err(err) = state.db.upsert_file(&record).await {
            warn!(path = %relative, error = %err, "file record write failed; scanner will repair");
            state.sync.queues().queue_add(record.clone());
        }

        info!(path = %relative, size = written, "upload stored");
        stored.push(json!({ "path": relative, "size": written }));
    }

    if stored.is_empty() {
        return Err(AppError::bad_request("no file field in upload"));
    }
    Ok(Json(json!({ "uploaded": stored })))
}

fn map_disk_err(err: std::io::Error) -> AppError {
    if err.raw_os_error() == Some(28) {
        AppError::new(axum::http::StatusCode::INSUFFICIENT_STORAGE, "disk full")
    } else {
        AppError::internal(format!("write failed: {err}"))
    }
}

/// Strip any path components a client smuggles into the filename.
fn sanitize_filename(raw: &str) -> String {
    raw.rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::sanitize_filename;

    #[test]
    fn filenames_lose_path_components() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\x\\a.txt"), "a.txt");
        assert_eq!(sanitize_filename("  spaced.bin "), "spaced.bin");
    }
}
