use stockpile_model::DownloadRecord;
use uuid::Uuid;

use super::rows::DownloadRow;
use super::{Database, exec, fetch_all, fetch_one};
use crate::error::Result;

impl Database {
    /// Append a download record. Statistics derive from this ledger; the
    /// per-file counter is bumped separately and best-effort.
    pub async fn record_download(&self, record: &DownloadRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, file_path, file_size, download_time, duration,
                             client_ip, user_agent, success, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            self.table("downloads")
        );
        exec!(
            self,
            &sql,
            Uuid::new_v4().to_string(),
            &record.file_path,
            record.file_size,
            record.download_time,
            record.duration,
            &record.client_ip,
            &record.user_agent,
            record.success,
            record.error_message.as_deref(),
        );
        Ok(())
    }

    pub async fn downloads_since(&self, since: i64) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE download_time >= $1",
            self.table("downloads")
        );
        let (count,) = fetch_one!(self, (i64,), &sql, since);
        Ok(count)
    }

    /// `(bucket_start, count)` pairs over `[since, now]`, bucketed by
    /// `bucket_secs` (e.g. 3600 for an hourly trend).
    pub async fn download_trend(&self, since: i64, bucket_secs: i64) -> Result<Vec<(i64, i64)>> {
        let sql = format!(
            "SELECT (download_time / $1) * $1 AS bucket, COUNT(*)
             FROM {} WHERE download_time >= $2
             GROUP BY bucket ORDER BY bucket",
            self.table("downloads")
        );
        Ok(fetch_all!(self, (i64, i64), &sql, bucket_secs, since))
    }

    /// Most-downloaded paths since `since`: `(path, count, last_time)`.
    pub async fn top_downloads(&self, since: i64, limit: i64) -> Result<Vec<(String, i64, i64)>> {
        let sql = format!(
            "SELECT file_path, COUNT(*) AS cnt, MAX(download_time) AS last_time
             FROM {} WHERE success = TRUE AND download_time >= $1
             GROUP BY file_path ORDER BY cnt DESC, file_path LIMIT $2",
            self.table("downloads")
        );
        Ok(fetch_all!(self, (String, i64, i64), &sql, since, limit))
    }

    pub async fn recent_downloads(&self, limit: i64) -> Result<Vec<DownloadRecord>> {
        let sql = format!(
            "SELECT file_path, file_size, download_time, duration, client_ip,
                    user_agent, success, error_message
             FROM {} ORDER BY download_time DESC LIMIT $1",
            self.table("downloads")
        );
        let rows = fetch_all!(self, DownloadRow, &sql, limit);
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, at: i64) -> DownloadRecord {
        DownloadRecord {
            download_time: at,
            ..DownloadRecord::success(path, 100)
        }
    }

    #[tokio::test]
    async fn counts_are_monotonic_over_appends() {
        let db = Database::connect_ephemeral().await.unwrap();
        let base = 1_700_000_000;

        db.record_download(&record("a.whl", base)).await.unwrap();
        let first = db.downloads_since(0).await.unwrap();
        db.record_download(&record("a.whl", base + 10)).await.unwrap();
        let second = db.downloads_since(0).await.unwrap();

        assert!(second > first);
    }

    #[tokio::test]
    async fn trend_buckets_group_by_hour() {
        let db = Database::connect_ephemeral().await.unwrap();
        let hour = 3600;
        let base = 1_700_000_000 / hour * hour;

        for offset in [0, 10, hour, hour + 5, hour * 2] {
            db.record_download(&record("x", base + offset)).await.unwrap();
        }

        let trend = db.download_trend(base, hour).await.unwrap();
        assert_eq!(trend, vec![(base, 2), (base + hour, 2), (base + hour * 2, 1)]);
    }

    #[tokio::test]
    async fn rank_orders_by_count() {
        let db = Database::connect_ephemeral().await.unwrap();
        let base = 1_700_000_000;
        for _ in 0..3 {
            db.record_download(&record("popular.tgz", base)).await.unwrap();
        }
        db.record_download(&record("rare.tgz", base)).await.unwrap();

        let top = db.top_downloads(0, 10).await.unwrap();
        assert_eq!(top[0].0, "popular.tgz");
        assert_eq!(top[0].1, 3);
        assert_eq!(top[1].0, "rare.tgz");
    }
}
