use stockpile_model::{SyncRun, SyncRunStatus, epoch_now};

use super::rows::SyncRunRow;
use super::{Database, exec, fetch_all, fetch_optional};
use crate::error::{CoreError, Result};

impl Database {
    pub async fn create_sync_run(&self, run: &SyncRun) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (sync_id, source_type, source_name, status, total_files,
                             synced_files, failed_files, total_size, synced_size,
                             started_at, completed_at, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            self.table("sync_runs")
        );
        exec!(
            self,
            &sql,
            &run.sync_id,
            &run.source_type,
            &run.source_name,
            run.status.as_str(),
            run.total_files,
            run.synced_files,
            run.failed_files,
            run.total_size,
            run.synced_size,
            run.started_at,
            run.completed_at,
            run.error_message.as_deref(),
        );
        Ok(())
    }

    /// `pending -> running`. Any other starting state is a conflict; status
    /// never regresses.
    pub async fn mark_sync_running(&self, sync_id: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = 'running' WHERE sync_id = $1 AND status = 'pending'",
            self.table("sync_runs")
        );
        if exec!(self, &sql, sync_id) == 0 {
            return Err(CoreError::Conflict(format!(
                "sync {sync_id} is not pending"
            )));
        }
        Ok(())
    }

    /// Progress counters while running; ignored once terminal.
    pub async fn update_sync_counts(
        &self,
        sync_id: &str,
        total_files: i64,
        synced_files: i64,
        failed_files: i64,
        synced_size: i64,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET total_files = $2, synced_files = $3, failed_files = $4,
                           synced_size = $5
             WHERE sync_id = $1 AND status = 'running'",
            self.table("sync_runs")
        );
        exec!(self, &sql, sync_id, total_files, synced_files, failed_files, synced_size);
        Ok(())
    }

    /// `running -> completed | failed`.
    pub async fn finish_sync_run(
        &self,
        sync_id: &str,
        status: SyncRunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        if !matches!(status, SyncRunStatus::Completed | SyncRunStatus::Failed) {
            return Err(CoreError::bad_request("terminal sync status required"));
        }
        let sql = format!(
            "UPDATE {} SET status = $2, completed_at = $3, error_message = $4
             WHERE sync_id = $1 AND status = 'running'",
            self.table("sync_runs")
        );
        if exec!(self, &sql, sync_id, status.as_str(), epoch_now(), error_message) == 0 {
            return Err(CoreError::Conflict(format!(
                "sync {sync_id} is not running"
            )));
        }
        Ok(())
    }

    pub async fn get_sync_run(&self, sync_id: &str) -> Result<Option<SyncRun>> {
        let sql = format!(
            "SELECT * FROM {} WHERE sync_id = $1",
            self.table("sync_runs")
        );
        let row = fetch_optional!(self, SyncRunRow, &sql, sync_id);
        row.map(TryInto::try_into).transpose()
    }

    pub async fn list_sync_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY started_at DESC LIMIT $1",
            self.table("sync_runs")
        );
        let rows = fetch_all!(self, SyncRunRow, &sql, limit);
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_run(id: &str) -> SyncRun {
        SyncRun {
            sync_id: id.to_string(),
            source_type: "pypi".to_string(),
            source_name: "pypi-popular".to_string(),
            status: SyncRunStatus::Pending,
            total_files: 0,
            synced_files: 0,
            failed_files: 0,
            total_size: 0,
            synced_size: 0,
            started_at: epoch_now(),
            completed_at: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn status_walks_pending_running_completed() {
        let db = Database::connect_ephemeral().await.unwrap();
        db.create_sync_run(&pending_run("s1")).await.unwrap();

        db.mark_sync_running("s1").await.unwrap();
        db.update_sync_counts("s1", 10, 8, 2, 1024).await.unwrap();
        db.finish_sync_run("s1", SyncRunStatus::Completed, None).await.unwrap();

        let run = db.get_sync_run("s1").await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.synced_files, 8);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn status_never_regresses() {
        let db = Database::connect_ephemeral().await.unwrap();
        db.create_sync_run(&pending_run("s2")).await.unwrap();
        db.mark_sync_running("s2").await.unwrap();
        db.finish_sync_run("s2", SyncRunStatus::Failed, Some("boom")).await.unwrap();

        // Terminal runs reject both re-start and re-finish.
        assert!(db.mark_sync_running("s2").await.is_err());
        assert!(db.finish_sync_run("s2", SyncRunStatus::Completed, None).await.is_err());

        let run = db.get_sync_run("s2").await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("boom"));
    }
}
