use stockpile_model::{CacheRecord, epoch_now};

use super::rows::CacheRow;
use super::{Database, exec, fetch_all, fetch_one};
use crate::error::Result;

impl Database {
    pub async fn upsert_cache_entry(&self, record: &CacheRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (cache_key, cache_type, file_path, file_size, file_hash,
                             hits, created_at, expires_at, last_hit)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (cache_key) DO UPDATE SET
                 cache_type = excluded.cache_type,
                 file_path = excluded.file_path,
                 file_size = excluded.file_size,
                 file_hash = excluded.file_hash,
                 expires_at = excluded.expires_at",
            self.table("cache_entries")
        );
        exec!(
            self,
            &sql,
            &record.cache_key,
            &record.cache_type,
            record.file_path.as_deref(),
            record.file_size,
            record.file_hash.as_deref(),
            record.hits,
            record.created_at,
            record.expires_at,
            record.last_hit,
        );
        Ok(())
    }

    pub async fn record_cache_hit(&self, cache_key: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET hits = hits + 1, last_hit = $2 WHERE cache_key = $1",
            self.table("cache_entries")
        );
        exec!(self, &sql, cache_key, epoch_now());
        Ok(())
    }

    pub async fn delete_cache_entry(&self, cache_key: &str) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE cache_key = $1",
            self.table("cache_entries")
        );
        Ok(exec!(self, &sql, cache_key) > 0)
    }

    pub async fn list_cache_entries(&self, limit: i64) -> Result<Vec<CacheRecord>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY last_hit DESC LIMIT $1",
            self.table("cache_entries")
        );
        let rows = fetch_all!(self, CacheRow, &sql, limit);
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// `(entries, total_bytes)` tracked in the cache index.
    pub async fn cache_index_usage(&self) -> Result<(i64, i64)> {
        let sql = format!(
            "SELECT COUNT(*), CAST(COALESCE(SUM(file_size), 0) AS BIGINT) FROM {}",
            self.table("cache_entries")
        );
        Ok(fetch_one!(self, (i64, i64), &sql))
    }

    /// Most-hit cache keys for the popularity endpoint.
    pub async fn popular_cache_entries(&self, limit: i64) -> Result<Vec<CacheRecord>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY hits DESC, cache_key LIMIT $1",
            self.table("cache_entries")
        );
        let rows = fetch_all!(self, CacheRow, &sql, limit);
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> CacheRecord {
        CacheRecord {
            cache_key: key.to_string(),
            cache_type: "pypi".to_string(),
            file_path: Some(format!("pypi/{key}")),
            file_size: 100,
            file_hash: None,
            hits: 0,
            created_at: epoch_now(),
            expires_at: None,
            last_hit: epoch_now(),
        }
    }

    #[tokio::test]
    async fn hits_accumulate_and_rank() {
        let db = Database::connect_ephemeral().await.unwrap();
        db.upsert_cache_entry(&entry("a")).await.unwrap();
        db.upsert_cache_entry(&entry("b")).await.unwrap();

        db.record_cache_hit("b").await.unwrap();
        db.record_cache_hit("b").await.unwrap();
        db.record_cache_hit("a").await.unwrap();

        let popular = db.popular_cache_entries(10).await.unwrap();
        assert_eq!(popular[0].cache_key, "b");
        assert_eq!(popular[0].hits, 2);

        let (count, bytes) = db.cache_index_usage().await.unwrap();
        assert_eq!((count, bytes), (2, 200));
    }
}
