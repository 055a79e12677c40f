//! Sync scheduler: pending-operation queues, the filesystem reconciliation
//! scan, cron/interval schedules, and the per-source bulk sync runner.

mod manager;
mod queue;
mod scanner;
mod schedule;

pub use manager::SyncManager;
pub use queue::{DrainedOps, PendingQueues};
pub use scanner::{ScanOutcome, file_id_for_path, reconcile};
pub use schedule::{CronSpec, Schedule};
