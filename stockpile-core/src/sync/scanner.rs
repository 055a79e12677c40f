//! Filesystem ↔ metadata-store reconciliation.
//!
//! One pass walks the base directory, diffs the live path set against the
//! store, inserts records for new files and soft-deletes records whose
//! files are gone. Cache internals (sidecars, temp files) are not tracked.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use stockpile_model::{FileRecord, SyncStatus};
use tracing::debug;

use crate::db::Database;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub scanned: u64,
    pub added: u64,
    pub removed: u64,
}

#[derive(Debug)]
struct ScannedFile {
    path: String,
    size: i64,
    modified: i64,
}

/// Stable file id derived from the path, so rescans converge on the same
/// record instead of multiplying rows.
pub fn file_id_for_path(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

pub async fn reconcile(db: &Database, base_dir: &Path) -> Result<ScanOutcome> {
    let base = base_dir.to_path_buf();
    let scanned = tokio::task::spawn_blocking(move || walk(&base))
        .await
        .map_err(|err| CoreError::internal(format!("scan task failed: {err}")))??;

    let mut outcome = ScanOutcome {
        scanned: scanned.len() as u64,
        ..Default::default()
    };

    let known: HashSet<String> = db.list_live_paths().await?.into_iter().collect();
    let on_disk: HashSet<&str> = scanned.iter().map(|f| f.path.as_str()).collect();

    for file in &scanned {
        if known.contains(&file.path) {
            continue;
        }
        let mut record = FileRecord::new(file_id_for_path(&file.path), file.path.clone(), file.size);
        record.updated_at = file.modified;
        record.sync_status = SyncStatus::Synced;
        db.upsert_file(&record).await?;
        outcome.added += 1;
    }

    for path in known {
        if !on_disk.contains(path.as_str()) && db.soft_delete_file(&path).await? {
            outcome.removed += 1;
        }
    }

    if outcome.added > 0 || outcome.removed > 0 {
        debug!(
            added = outcome.added,
            removed = outcome.removed,
            "reconciliation scan applied changes"
        );
    }
    Ok(outcome)
}

fn walk(base: &Path) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    if !base.exists() {
        return Ok(files);
    }
    let mut pending: Vec<PathBuf> = vec![base.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".meta") || name.starts_with(".tmp.") {
                continue;
            }
            let Ok(relative) = path.strip_prefix(base) else {
                continue;
            };
            let metadata = entry.metadata()?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or_else(stockpile_model::epoch_now);
            files.push(ScannedFile {
                path: relative.to_string_lossy().replace('\\', "/"),
                size: metadata.len() as i64,
                modified,
            });
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_adds_new_files_and_removes_missing_records() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_ephemeral().await.unwrap();

        std::fs::create_dir_all(dir.path().join("pypi/packages")).unwrap();
        std::fs::write(dir.path().join("pypi/packages/a.whl"), b"wheel").unwrap();
        std::fs::write(dir.path().join("pypi/packages/a.whl.meta"), b"{}").unwrap();
        std::fs::write(dir.path().join("pypi/.tmp.123"), b"junk").unwrap();

        let outcome = reconcile(&db, dir.path()).await.unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.removed, 0);

        let record = db.get_file_by_path("pypi/packages/a.whl").await.unwrap().unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(record.sync_status, SyncStatus::Synced);

        // Delete the file on disk; the next scan produces the delete event.
        std::fs::remove_file(dir.path().join("pypi/packages/a.whl")).unwrap();
        let outcome = reconcile(&db, dir.path()).await.unwrap();
        assert_eq!(outcome.removed, 1);
        assert!(db.get_file_by_path("pypi/packages/a.whl").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rescans_converge_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_ephemeral().await.unwrap();
        std::fs::write(dir.path().join("file.bin"), b"abc").unwrap();

        reconcile(&db, dir.path()).await.unwrap();
        let second = reconcile(&db, dir.path()).await.unwrap();
        assert_eq!(second.added, 0);

        let (count, _) = db.file_stats().await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            db.get_file_by_path("file.bin").await.unwrap().unwrap().file_id,
            file_id_for_path("file.bin")
        );
    }
}
