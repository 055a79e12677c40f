//! Sync orchestration: the queue-drain loop, the reconciliation scan loop,
//! and the cron/interval task runner driving per-source bulk pulls.
//!
//! Bulk syncs fill the cache through the normal adapter path, so every
//! pulled item lands exactly where a client request would have put it. A
//! source never runs two overlapping syncs; a due tick while the previous
//! run is still active is skipped.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stockpile_config::SyncSection;
use stockpile_model::{SyncProgress, SyncRun, SyncRunStatus, epoch_now};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::queue::PendingQueues;
use super::scanner;
use super::schedule::Schedule;
use crate::db::Database;
use crate::error::{CoreError, Result};
use crate::mirrors::{MirrorRegistry, MirrorRequest};

#[derive(Debug)]
pub struct SyncManager {
    db: Database,
    registry: Arc<MirrorRegistry>,
    queues: Arc<PendingQueues>,
    config: SyncSection,
    base_dir: PathBuf,
    progress: RwLock<HashMap<String, SyncProgress>>,
    running: RwLock<HashSet<String>>,
    stop_requests: RwLock<HashSet<String>>,
    last_runs: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl SyncManager {
    pub fn new(
        db: Database,
        registry: Arc<MirrorRegistry>,
        config: SyncSection,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            registry,
            queues: Arc::new(PendingQueues::new()),
            config,
            base_dir,
            progress: RwLock::new(HashMap::new()),
            running: RwLock::new(HashSet::new()),
            stop_requests: RwLock::new(HashSet::new()),
            last_runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn queues(&self) -> Arc<PendingQueues> {
        self.queues.clone()
    }

    pub fn source_names(&self) -> Vec<String> {
        self.config.sources.keys().cloned().collect()
    }

    pub async fn progress_for(&self, source: &str) -> Option<SyncProgress> {
        self.progress.read().await.get(source).cloned()
    }

    pub async fn all_progress(&self) -> Vec<SyncProgress> {
        let mut progress: Vec<SyncProgress> = self.progress.read().await.values().cloned().collect();
        progress.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        progress
    }

    pub async fn history(&self, limit: i64) -> Result<Vec<SyncRun>> {
        self.db.list_sync_runs(limit).await
    }

    /// Overall loop status for the control API.
    pub async fn status(&self) -> serde_json::Value {
        let (add, update, delete) = self.queues.depths();
        let running: Vec<String> = self.running.read().await.iter().cloned().collect();
        serde_json::json!({
            "enabled": self.config.enabled,
            "sync_interval_secs": self.config.sync_interval_secs,
            "scan_interval_secs": self.config.scan_interval_secs,
            "pending_add": add,
            "pending_update": update,
            "pending_delete": delete,
            "running_sources": running,
        })
    }

    /// Start a configured bulk sync. Errors if the source is unknown or
    /// already running.
    pub async fn start_sync(self: &Arc<Self>, source_name: &str) -> Result<String> {
        let source = self
            .config
            .sources
            .get(source_name)
            .ok_or_else(|| CoreError::not_found(format!("unknown sync source: {source_name}")))?
            .clone();
        self.launch(
            source_name.to_string(),
            source.source_type.clone(),
            source.items,
            false,
        )
        .await
    }

    /// Ad-hoc sync of an explicit item list, tracked under the same
    /// per-source slot and flagged as temporary.
    pub async fn sync_packages(
        self: &Arc<Self>,
        source_type: &str,
        items: Vec<String>,
    ) -> Result<String> {
        if items.is_empty() {
            return Err(CoreError::bad_request("no packages requested"));
        }
        self.launch(
            format!("{source_type}-adhoc"),
            source_type.to_string(),
            items,
            true,
        )
        .await
    }

    pub async fn request_stop(&self, source_name: &str) -> bool {
        if self.running.read().await.contains(source_name) {
            self.stop_requests.write().await.insert(source_name.to_string());
            true
        } else {
            false
        }
    }

    async fn launch(
        self: &Arc<Self>,
        source_name: String,
        source_type: String,
        items: Vec<String>,
        is_temp: bool,
    ) -> Result<String> {
        {
            let mut running = self.running.write().await;
            if !running.insert(source_name.clone()) {
                return Err(CoreError::Conflict(format!(
                    "sync already running for {source_name}"
                )));
            }
        }

        let sync_id = Uuid::new_v4().to_string();
        let run = SyncRun {
            sync_id: sync_id.clone(),
            source_type: source_type.clone(),
            source_name: source_name.clone(),
            status: SyncRunStatus::Pending,
            total_files: items.len() as i64,
            synced_files: 0,
            failed_files: 0,
            total_size: 0,
            synced_size: 0,
            started_at: epoch_now(),
            completed_at: None,
            error_message: None,
        };
        if let Err(err) = self.db.create_sync_run(&run).await {
            self.running.write().await.remove(&source_name);
            return Err(err);
        }

        {
            let mut progress = self.progress.write().await;
            let entry = progress
                .entry(source_name.clone())
                .or_insert_with(|| SyncProgress::idle(&source_name));
            entry.status = SyncRunStatus::Pending;
            entry.total_files = items.len() as u64;
            entry.synced_files = 0;
            entry.failed_files = 0;
            entry.is_temp_sync = is_temp;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager
                .run_bulk(sync_id, source_name, source_type, items)
                .await;
        });
        Ok(run.sync_id)
    }

    async fn run_bulk(
        self: Arc<Self>,
        sync_id: String,
        source_name: String,
        source_type: String,
        items: Vec<String>,
    ) {
        info!(source = %source_name, items = items.len(), "bulk sync starting");
        if let Err(err) = self.db.mark_sync_running(&sync_id).await {
            error!(source = %source_name, error = %err, "could not mark sync running");
            self.finish(&source_name, SyncRunStatus::Failed).await;
            return;
        }
        self.set_progress_status(&source_name, SyncRunStatus::Running).await;

        let mut synced: u64 = 0;
        let mut failed: u64 = 0;
        let mut synced_size: i64 = 0;
        let mut stopped = false;

        for item in &items {
            if self.stop_requests.write().await.remove(&source_name) {
                warn!(source = %source_name, "sync stopped on request");
                stopped = true;
                break;
            }
            match self
                .registry
                .dispatch(&source_type, MirrorRequest::path(item))
                .await
            {
                Ok(response) if response.status < 400 => {
                    synced += 1;
                    synced_size += response.body.len() as i64;
                }
                Ok(response) => {
                    warn!(source = %source_name, item, status = response.status, "sync item rejected");
                    failed += 1;
                }
                Err(err) => {
                    warn!(source = %source_name, item, error = %err, "sync item failed");
                    failed += 1;
                }
            }

            {
                let mut progress = self.progress.write().await;
                if let Some(entry) = progress.get_mut(&source_name) {
                    entry.synced_files = synced;
                    entry.failed_files = failed;
                }
            }
            let _ = self
                .db
                .update_sync_counts(&sync_id, items.len() as i64, synced as i64, failed as i64, synced_size)
                .await;
        }

        let status = if stopped || failed == items.len() as u64 && !items.is_empty() {
            SyncRunStatus::Failed
        } else {
            SyncRunStatus::Completed
        };
        let error_message = match (stopped, failed) {
            (true, _) => Some("stopped by operator".to_string()),
            (false, 0) => None,
            (false, n) => Some(format!("{n} items failed")),
        };
        if let Err(err) = self
            .db
            .finish_sync_run(&sync_id, status, error_message.as_deref())
            .await
        {
            error!(source = %source_name, error = %err, "could not finish sync run");
        }
        self.finish(&source_name, status).await;
        info!(
            source = %source_name,
            synced,
            failed,
            status = status.as_str(),
            "bulk sync finished"
        );
    }

    async fn set_progress_status(&self, source_name: &str, status: SyncRunStatus) {
        let mut progress = self.progress.write().await;
        if let Some(entry) = progress.get_mut(source_name) {
            entry.status = status;
        }
    }

    async fn finish(&self, source_name: &str, status: SyncRunStatus) {
        {
            let mut progress = self.progress.write().await;
            if let Some(entry) = progress.get_mut(source_name) {
                entry.status = status;
                entry.last_sync = Some(Utc::now());
            }
        }
        self.last_runs
            .write()
            .await
            .insert(source_name.to_string(), Utc::now());
        self.running.write().await.remove(source_name);
        self.stop_requests.write().await.remove(source_name);
    }

    /// Spawn the three background loops. Handles are returned so the
    /// launcher can abort them on shutdown.
    pub fn spawn_loops(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut handles = Vec::new();

        let manager = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(manager.config.sync_interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = manager.drain_queues().await {
                    error!(error = %err, "sync loop failed");
                }
            }
        }));

        if self.config.auto_scan {
            let manager = self.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(
                    manager.config.scan_interval_secs.max(5),
                ));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(err) = scanner::reconcile(&manager.db, &manager.base_dir).await {
                        error!(error = %err, "reconciliation scan failed");
                    }
                }
            }));
        }

        let manager = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.tick_schedules().await;
            }
        }));

        handles
    }

    /// Push every queued operation into the metadata store.
    pub async fn drain_queues(&self) -> Result<()> {
        let drained = self.queues.drain();
        if drained.is_empty() {
            return Ok(());
        }
        for record in drained.add.iter().chain(drained.update.iter()) {
            if let Err(err) = self.db.upsert_file(record).await {
                warn!(path = %record.path, error = %err, "queued upsert failed");
            }
        }
        for path in &drained.delete {
            if let Err(err) = self.db.soft_delete_file(path).await {
                warn!(path = %path, error = %err, "queued delete failed");
            }
        }
        Ok(())
    }

    /// One scheduler tick: launch every due, not-currently-running source.
    pub async fn tick_schedules(self: &Arc<Self>) {
        let now = Utc::now();
        for (name, source) in &self.config.sources {
            if !source.schedule.enabled {
                continue;
            }
            let schedule = match Schedule::from_spec(&source.schedule) {
                Ok(schedule) => schedule,
                Err(err) => {
                    warn!(source = %name, error = %err, "invalid schedule, skipping");
                    continue;
                }
            };
            let last_run = self.last_runs.read().await.get(name).copied();
            if !schedule.is_due(now, last_run) {
                continue;
            }
            if self.running.read().await.contains(name) {
                // No overlap: a due tick during an active run is dropped.
                continue;
            }
            match self.start_sync(name).await {
                Ok(sync_id) => info!(source = %name, sync_id = %sync_id, "scheduled sync launched"),
                Err(err) => warn!(source = %name, error = %err, "scheduled sync failed to launch"),
            }
            if let Some(entry) = self.progress.write().await.get_mut(name) {
                entry.next_sync = schedule.next_run(now, Some(now));
            }
        }
    }

    /// Immediate reconciliation pass, exposed for the control API.
    pub async fn scan_now(&self) -> Result<scanner::ScanOutcome> {
        scanner::reconcile(&self.db, &self.base_dir).await
    }
}
