use stockpile_model::MonitorSample;

use super::rows::MonitorRow;
use super::{Database, exec, fetch_all};
use crate::error::Result;

impl Database {
    pub async fn insert_monitor_sample(&self, sample: &MonitorSample) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (timestamp, cpu_percent, memory_percent, disk_percent,
                             network_rx, network_tx, active_connections, server_uptime, note)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            self.table("monitor_samples")
        );
        exec!(
            self,
            &sql,
            sample.timestamp,
            sample.cpu_percent,
            sample.memory_percent,
            sample.disk_percent,
            sample.network_rx,
            sample.network_tx,
            sample.active_connections,
            sample.server_uptime,
            sample.note.as_deref(),
        );
        Ok(())
    }

    /// Samples in `[since, now]`, oldest first. Hour-window queries pass
    /// `now - hours * 3600`.
    pub async fn monitor_samples_since(&self, since: i64) -> Result<Vec<MonitorSample>> {
        let sql = format!(
            "SELECT * FROM {} WHERE timestamp >= $1 ORDER BY timestamp",
            self.table("monitor_samples")
        );
        let rows = fetch_all!(self, MonitorRow, &sql, since);
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn prune_monitor_samples(&self, before: i64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE timestamp < $1",
            self.table("monitor_samples")
        );
        Ok(exec!(self, &sql, before))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retention_window_query_and_prune() {
        let db = Database::connect_ephemeral().await.unwrap();
        for ts in [100, 200, 300] {
            db.insert_monitor_sample(&MonitorSample::empty(ts)).await.unwrap();
        }

        let recent = db.monitor_samples_since(150).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp, 200);

        assert_eq!(db.prune_monitor_samples(250).await.unwrap(), 2);
        assert_eq!(db.monitor_samples_since(0).await.unwrap().len(), 1);
    }
}
