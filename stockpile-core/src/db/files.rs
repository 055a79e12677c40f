use stockpile_model::{FileRecord, epoch_now};

use super::rows::FileRow;
use super::{Database, exec, fetch_all, fetch_one, fetch_optional};
use crate::error::Result;

impl Database {
    /// Insert a file record, or refresh the live record at the same path.
    /// Conflict resolution rides on the partial unique index over
    /// `(path) WHERE is_deleted = FALSE`.
    pub async fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (file_id, path, name, size, hash, mime_type, is_dir,
                             created_at, updated_at, last_accessed, download_count,
                             is_deleted, sync_status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE, $12)
             ON CONFLICT (path) WHERE is_deleted = FALSE DO UPDATE SET
                 size = excluded.size,
                 name = excluded.name,
                 hash = excluded.hash,
                 mime_type = excluded.mime_type,
                 updated_at = excluded.updated_at,
                 last_accessed = excluded.last_accessed,
                 sync_status = excluded.sync_status",
            self.table("files")
        );
        exec!(
            self,
            &sql,
            &record.file_id,
            &record.path,
            &record.name,
            record.size,
            record.hash.as_deref(),
            record.mime_type.as_deref(),
            record.is_dir,
            record.created_at,
            record.updated_at,
            record.last_accessed,
            record.download_count,
            record.sync_status.as_str(),
        );
        Ok(())
    }

    pub async fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let sql = format!(
            "SELECT * FROM {} WHERE path = $1 AND is_deleted = FALSE",
            self.table("files")
        );
        let row = fetch_optional!(self, FileRow, &sql, path);
        row.map(TryInto::try_into).transpose()
    }

    pub async fn get_file_by_id(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT * FROM {} WHERE file_id = $1", self.table("files"));
        let row = fetch_optional!(self, FileRow, &sql, file_id);
        row.map(TryInto::try_into).transpose()
    }

    pub async fn list_files(&self, limit: i64, offset: i64) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT * FROM {} WHERE is_deleted = FALSE
             ORDER BY path LIMIT $1 OFFSET $2",
            self.table("files")
        );
        let rows = fetch_all!(self, FileRow, &sql, limit, offset);
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// All live non-directory paths, for the reconciliation scan.
    pub async fn list_live_paths(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT path FROM {} WHERE is_deleted = FALSE AND is_dir = FALSE",
            self.table("files")
        );
        #[derive(sqlx::FromRow)]
        struct PathRow {
            path: String,
        }
        let rows = fetch_all!(self, PathRow, &sql);
        Ok(rows.into_iter().map(|r| r.path).collect())
    }

    /// Soft-delete the live record at `path`. Returns whether one existed.
    pub async fn soft_delete_file(&self, path: &str) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET is_deleted = TRUE, updated_at = $2
             WHERE path = $1 AND is_deleted = FALSE",
            self.table("files")
        );
        Ok(exec!(self, &sql, path, epoch_now()) > 0)
    }

    /// Hard-delete every soft-deleted row. Explicit purge only.
    pub async fn purge_deleted_files(&self) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE is_deleted = TRUE", self.table("files"));
        Ok(exec!(self, &sql))
    }

    /// Best-effort per-file counter bump on a served download.
    pub async fn record_file_access(&self, path: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET last_accessed = $2, download_count = download_count + 1
             WHERE path = $1 AND is_deleted = FALSE",
            self.table("files")
        );
        exec!(self, &sql, path, epoch_now());
        Ok(())
    }

    /// `(file_count, total_bytes)` over live non-directory records.
    pub async fn file_stats(&self) -> Result<(i64, i64)> {
        // SUM(BIGINT) widens to NUMERIC on postgres; cast back for i64.
        let sql = format!(
            "SELECT COUNT(*), CAST(COALESCE(SUM(size), 0) AS BIGINT) FROM {}
             WHERE is_deleted = FALSE AND is_dir = FALSE",
            self.table("files")
        );
        Ok(fetch_one!(self, (i64, i64), &sql))
    }

    pub async fn search_files(&self, needle: &str, limit: i64) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT * FROM {} WHERE is_deleted = FALSE AND path LIKE $1
             ORDER BY path LIMIT $2",
            self.table("files")
        );
        let pattern = format!("%{needle}%");
        let rows = fetch_all!(self, FileRow, &sql, pattern, limit);
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_model::SyncStatus;

    #[tokio::test]
    async fn upsert_respects_live_path_uniqueness() {
        let db = Database::connect_ephemeral().await.unwrap();

        let mut record = FileRecord::new("id-1", "pypi/simple/flask", 10);
        db.upsert_file(&record).await.unwrap();

        record.size = 42;
        record.sync_status = SyncStatus::Synced;
        db.upsert_file(&record).await.unwrap();

        let fetched = db.get_file_by_path("pypi/simple/flask").await.unwrap().unwrap();
        assert_eq!(fetched.size, 42);
        assert_eq!(fetched.sync_status, SyncStatus::Synced);

        let (count, bytes) = db.file_stats().await.unwrap();
        assert_eq!((count, bytes), (1, 42));
    }

    #[tokio::test]
    async fn delete_then_reupload_yields_live_record_again() {
        let db = Database::connect_ephemeral().await.unwrap();

        db.upsert_file(&FileRecord::new("id-1", "docs/readme.txt", 5))
            .await
            .unwrap();
        assert!(db.soft_delete_file("docs/readme.txt").await.unwrap());
        assert!(db.get_file_by_path("docs/readme.txt").await.unwrap().is_none());

        // Same path, fresh record: allowed because the old row is dead.
        db.upsert_file(&FileRecord::new("id-2", "docs/readme.txt", 9))
            .await
            .unwrap();
        let live = db.get_file_by_path("docs/readme.txt").await.unwrap().unwrap();
        assert_eq!(live.file_id, "id-2");
        assert!(!live.is_deleted);
    }

    #[tokio::test]
    async fn purge_removes_only_dead_rows() {
        let db = Database::connect_ephemeral().await.unwrap();
        db.upsert_file(&FileRecord::new("a", "a.bin", 1)).await.unwrap();
        db.upsert_file(&FileRecord::new("b", "b.bin", 1)).await.unwrap();
        db.soft_delete_file("a.bin").await.unwrap();

        assert_eq!(db.purge_deleted_files().await.unwrap(), 1);
        assert!(db.get_file_by_path("b.bin").await.unwrap().is_some());
    }
}
