//! Proactive cache fill from curated item lists.
//!
//! Targets expand into pending items which are processed by a bounded pool
//! of workers in priority order (`critical > high > medium > low`). Each
//! item is pulled through the normal adapter path, so a prewarmed artifact
//! is byte-identical to one fetched by a client. Failed items get one
//! re-queue before they are marked failed for good.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use stockpile_config::{PrewarmSection, PrewarmTargetSpec};
use stockpile_model::{
    PrewarmItem, PrewarmItemStatus, PrewarmPriority, PrewarmSummary, PrewarmTarget,
};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::mirrors::{MirrorRegistry, MirrorRequest};

const HISTORY_CAP: usize = 20;

#[derive(Debug)]
pub struct CachePrewarmer {
    registry: Arc<MirrorRegistry>,
    batch_size: usize,
    max_attempts: u32,
    default_targets: Vec<PrewarmTargetSpec>,
    items: Mutex<Vec<PrewarmItem>>,
    history: Mutex<Vec<PrewarmSummary>>,
    running: AtomicBool,
}

impl CachePrewarmer {
    pub fn new(registry: Arc<MirrorRegistry>, config: &PrewarmSection) -> Self {
        Self {
            registry,
            batch_size: config.batch_size.max(1),
            max_attempts: config.max_attempts.max(1),
            default_targets: config.targets.clone(),
            items: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Expand targets into pending items. `limit = 0` takes the whole list.
    pub async fn add_targets(&self, targets: &[PrewarmTarget]) -> usize {
        let mut created = 0;
        let mut items = self.items.lock().await;
        for target in targets {
            let take = if target.limit == 0 { target.items.len() } else { target.limit };
            for item_name in target.items.iter().take(take) {
                items.push(PrewarmItem {
                    id: Uuid::new_v4().to_string(),
                    mirror_type: target.mirror_type.clone(),
                    item_name: item_name.clone(),
                    url: request_path(&target.mirror_type, item_name),
                    priority: target.priority,
                    status: PrewarmItemStatus::Pending,
                    attempts: 0,
                    response_time_ms: None,
                    size_bytes: None,
                    error: None,
                    created_at: Utc::now(),
                });
                created += 1;
            }
        }
        created
    }

    /// Run one prewarm pass over the given targets (or the configured
    /// defaults). Only one pass runs at a time.
    pub async fn run(self: &Arc<Self>, targets: Option<Vec<PrewarmTarget>>) -> Result<PrewarmSummary> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoreError::Conflict("prewarm already running".to_string()));
        }
        let result = self.run_inner(targets).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(self: &Arc<Self>, targets: Option<Vec<PrewarmTarget>>) -> Result<PrewarmSummary> {
        let targets = targets.unwrap_or_else(|| {
            self.default_targets.iter().map(spec_to_target).collect()
        });
        self.add_targets(&targets).await;

        // Take the pending batch, hottest priority first.
        let mut batch: Vec<PrewarmItem> = {
            let mut items = self.items.lock().await;
            let pending: Vec<PrewarmItem> = items
                .iter()
                .filter(|i| i.status == PrewarmItemStatus::Pending)
                .cloned()
                .collect();
            items.retain(|i| i.status != PrewarmItemStatus::Pending);
            pending
        };
        batch.sort_by(|a, b| b.priority.cmp(&a.priority));

        let started = Instant::now();
        let mut summary = PrewarmSummary {
            total: batch.len(),
            success: 0,
            failed: 0,
            skipped: 0,
            elapsed_seconds: 0.0,
            finished_at: Utc::now(),
        };

        let mut round = batch;
        while !round.is_empty() {
            let semaphore = Arc::new(Semaphore::new(self.batch_size));
            let workers = round.into_iter().map(|item| {
                let semaphore = semaphore.clone();
                let prewarmer = self.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore open");
                    prewarmer.process_item(item).await
                }
            });
            let finished = join_all(workers).await;

            let mut retry = Vec::new();
            for item in finished {
                match item.status {
                    PrewarmItemStatus::Success => summary.success += 1,
                    PrewarmItemStatus::Skipped => summary.skipped += 1,
                    PrewarmItemStatus::Failed if item.attempts < self.max_attempts => {
                        let mut requeued = item;
                        requeued.status = PrewarmItemStatus::Pending;
                        retry.push(requeued);
                    }
                    PrewarmItemStatus::Failed => {
                        summary.failed += 1;
                        self.items.lock().await.push(item);
                    }
                    _ => {}
                }
            }
            round = retry;
        }

        summary.elapsed_seconds = started.elapsed().as_secs_f64();
        summary.finished_at = Utc::now();
        info!(
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            "prewarm pass finished"
        );

        let mut history = self.history.lock().await;
        history.push(summary.clone());
        if history.len() > HISTORY_CAP {
            let drop = history.len() - HISTORY_CAP;
            history.drain(..drop);
        }
        Ok(summary)
    }

    async fn process_item(&self, mut item: PrewarmItem) -> PrewarmItem {
        item.attempts += 1;
        item.status = PrewarmItemStatus::Running;
        let started = Instant::now();

        match self
            .registry
            .dispatch(&item.mirror_type, MirrorRequest::path(&item.url))
            .await
        {
            Ok(response) => {
                item.response_time_ms = Some(started.elapsed().as_millis() as u64);
                item.size_bytes = Some(response.body.len() as u64);
                item.status = if response.cache_hit {
                    PrewarmItemStatus::Skipped
                } else {
                    PrewarmItemStatus::Success
                };
            }
            Err(err) => {
                warn!(
                    mirror = %item.mirror_type,
                    item = %item.item_name,
                    attempt = item.attempts,
                    error = %err,
                    "prewarm item failed"
                );
                item.response_time_ms = Some(started.elapsed().as_millis() as u64);
                item.error = Some(err.to_string());
                item.status = PrewarmItemStatus::Failed;
            }
        }
        item
    }

    pub async fn items(&self, status: Option<PrewarmItemStatus>) -> Vec<PrewarmItem> {
        let items = self.items.lock().await;
        items
            .iter()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect()
    }

    pub async fn clear_items(&self, status: Option<PrewarmItemStatus>) -> usize {
        let mut items = self.items.lock().await;
        let before = items.len();
        match status {
            Some(status) => items.retain(|i| i.status != status),
            None => items.clear(),
        }
        before - items.len()
    }

    pub async fn history(&self, limit: usize) -> Vec<PrewarmSummary> {
        let history = self.history.lock().await;
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }
}

fn spec_to_target(spec: &PrewarmTargetSpec) -> PrewarmTarget {
    PrewarmTarget {
        mirror_type: spec.mirror_type.clone(),
        items: spec.items.clone(),
        priority: spec.priority.parse().unwrap_or(PrewarmPriority::Medium),
        limit: spec.limit,
    }
}

/// Adapter subpath that warms the right cache entry for one named item.
fn request_path(mirror_type: &str, item: &str) -> String {
    match mirror_type {
        "pypi" => format!("simple/{item}/"),
        "npm" => item.to_string(),
        "go" => format!("{item}/@latest"),
        "docker" => format!("{item}/tags/list"),
        _ => item.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_puts_critical_first() {
        let mut priorities = vec![
            PrewarmPriority::Medium,
            PrewarmPriority::Critical,
            PrewarmPriority::Low,
            PrewarmPriority::High,
        ];
        priorities.sort_by(|a, b| b.cmp(a));
        assert_eq!(
            priorities,
            vec![
                PrewarmPriority::Critical,
                PrewarmPriority::High,
                PrewarmPriority::Medium,
                PrewarmPriority::Low,
            ]
        );
    }

    #[test]
    fn request_paths_match_adapter_grammars() {
        assert_eq!(request_path("pypi", "flask"), "simple/flask/");
        assert_eq!(request_path("npm", "@types/node"), "@types/node");
        assert_eq!(request_path("go", "golang.org/x/net"), "golang.org/x/net/@latest");
        assert_eq!(request_path("docker", "library/ubuntu"), "library/ubuntu/tags/list");
        assert_eq!(request_path("maven", "org/x/a.jar"), "org/x/a.jar");
    }
}
