//! System resource sampler.
//!
//! A background loop snapshots CPU, memory, disk, and network counters via
//! `sysinfo` and persists one [`MonitorSample`] per tick; the same snapshot
//! path backs the control API's realtime endpoint. Counters that cannot be
//! read (permissions, exotic platforms) degrade to zero and set the
//! sample's `note` instead of failing the response.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use stockpile_model::{MonitorSample, epoch_now};
use sysinfo::{Disks, Networks, System};
use tracing::{debug, error};

use crate::db::Database;
use crate::lifecycle::RestartManager;

#[derive(Debug)]
pub struct MonitorSampler {
    db: Database,
    lifecycle: Arc<RestartManager>,
    base_dir: PathBuf,
    interval: Duration,
    retention: Duration,
    started: Instant,
    system: Mutex<System>,
}

impl MonitorSampler {
    pub fn new(
        db: Database,
        lifecycle: Arc<RestartManager>,
        base_dir: PathBuf,
        interval_secs: u64,
        retention_hours: u64,
    ) -> Self {
        Self {
            db,
            lifecycle,
            base_dir,
            interval: Duration::from_secs(interval_secs.max(5)),
            retention: Duration::from_secs(retention_hours.max(1) * 3600),
            started: Instant::now(),
            system: Mutex::new(System::new()),
        }
    }

    /// Synchronous snapshot for the realtime endpoint.
    pub fn snapshot(&self) -> MonitorSample {
        let mut sample = MonitorSample::empty(epoch_now());
        let mut notes: Vec<&str> = Vec::new();

        {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            sample.cpu_percent = f64::from(system.global_cpu_usage());
            let total = system.total_memory();
            if total > 0 {
                sample.memory_percent = system.used_memory() as f64 / total as f64 * 100.0;
            } else {
                notes.push("memory counters unavailable");
            }
        }

        match disk_usage_percent(&self.base_dir) {
            Some(percent) => sample.disk_percent = percent,
            None => notes.push("disk counters unavailable"),
        }

        let networks = Networks::new_with_refreshed_list();
        let mut rx: u64 = 0;
        let mut tx: u64 = 0;
        for (_name, data) in networks.iter() {
            rx += data.total_received();
            tx += data.total_transmitted();
        }
        sample.network_rx = rx as i64;
        sample.network_tx = tx as i64;

        // Socket tables need privileges we may not have; the in-flight
        // request counter is the connection signal we always own.
        sample.active_connections = self.lifecycle.pending_requests() as i64;
        sample.server_uptime = self.started.elapsed().as_secs() as i64;

        if !notes.is_empty() {
            sample.note = Some(notes.join("; "));
        }
        sample
    }

    /// Sample-and-persist loop with retention pruning.
    pub async fn run_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let sample = self.snapshot();
            if let Err(err) = self.db.insert_monitor_sample(&sample).await {
                error!(error = %err, "failed to persist monitor sample");
                continue;
            }
            let horizon = epoch_now() - self.retention.as_secs() as i64;
            match self.db.prune_monitor_samples(horizon).await {
                Ok(0) => {}
                Ok(pruned) => debug!(pruned, "pruned old monitor samples"),
                Err(err) => error!(error = %err, "failed to prune monitor samples"),
            }
        }
    }
}

/// Usage of the filesystem holding `path`: longest matching mount point.
fn disk_usage_percent(path: &std::path::Path) -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, f64)> = None;
    for disk in disks.iter() {
        let mount = disk.mount_point();
        if !path.starts_with(mount) {
            continue;
        }
        let total = disk.total_space();
        if total == 0 {
            continue;
        }
        let used = total.saturating_sub(disk.available_space());
        let percent = used as f64 / total as f64 * 100.0;
        let depth = mount.components().count();
        if best.is_none_or(|(d, _)| depth >= d) {
            best = Some((depth, percent));
        }
    }
    best.map(|(_, percent)| percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn snapshot_is_always_well_formed() {
        let db = Database::connect_ephemeral().await.unwrap();
        let lifecycle = RestartManager::new(Duration::from_secs(1));
        let sampler = MonitorSampler::new(db, lifecycle, PathBuf::from("/"), 60, 24);

        let sample = sampler.snapshot();
        assert!(sample.timestamp > 0);
        assert!(sample.cpu_percent >= 0.0);
        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!(sample.network_rx >= 0);
        assert_eq!(sample.active_connections, 0);
    }

    #[tokio::test]
    async fn inflight_requests_show_as_active_connections() {
        let db = Database::connect_ephemeral().await.unwrap();
        let lifecycle = RestartManager::new(Duration::from_secs(1));
        let sampler = MonitorSampler::new(db, lifecycle.clone(), PathBuf::from("/"), 60, 24);

        let _guard = lifecycle.begin_request().unwrap();
        assert_eq!(sampler.snapshot().active_connections, 1);
    }
}
