//! Graceful lifecycle: in-flight request tracking, drain, and restart
//! strategies.
//!
//! Every request takes a [`RequestGuard`] on entry; the guard's `Drop`
//! decrements the counter, so the count cannot leak on panics or client
//! disconnects. A restart (or termination signal) flips the server into
//! `Stopping`, after which new requests are refused, the manager waits for
//! the counter to reach zero (bounded by the graceful timeout), and the
//! shutdown signal resolves the serve future.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartStrategy {
    /// Drain in-flight requests (bounded by the timeout), then exit.
    Graceful,
    /// Exit without waiting.
    Immediate,
    /// Recorded for an external orchestrator; a single process treats it
    /// like graceful.
    Rolling,
}

impl FromStr for RestartStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "graceful" => Ok(RestartStrategy::Graceful),
            "immediate" => Ok(RestartStrategy::Immediate),
            "rolling" => Ok(RestartStrategy::Rolling),
            other => Err(CoreError::bad_request(format!("unknown restart strategy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartRecord {
    pub timestamp: DateTime<Utc>,
    pub strategy: RestartStrategy,
    pub pending_at_start: u64,
    pub drained: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingRestart {
    pub strategy: RestartStrategy,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RestartManager {
    state: RwLock<ServerState>,
    pending: AtomicU64,
    graceful_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    pending_restart: Mutex<Option<PendingRestart>>,
    history: Mutex<Vec<RestartRecord>>,
}

/// RAII in-flight marker; dropping it decrements the counter.
#[derive(Debug)]
pub struct RequestGuard {
    manager: Arc<RestartManager>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.manager.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RestartManager {
    pub fn new(graceful_timeout: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            state: RwLock::new(ServerState::Running),
            pending: AtomicU64::new(0),
            graceful_timeout,
            shutdown_tx,
            pending_restart: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    pub fn pending_requests(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Register a new request. Refused once the server is stopping.
    pub fn begin_request(self: &Arc<Self>) -> Option<RequestGuard> {
        if self.state() == ServerState::Stopping {
            return None;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        Some(RequestGuard {
            manager: self.clone(),
        })
    }

    /// Future that resolves once shutdown has been confirmed; handed to the
    /// serve loop's graceful-shutdown hook.
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    /// Stage a restart; execution waits for confirmation.
    pub fn prepare_restart(&self, strategy: RestartStrategy) -> PendingRestart {
        let pending = PendingRestart {
            strategy,
            requested_at: Utc::now(),
        };
        *self.pending_restart.lock() = Some(pending.clone());
        pending
    }

    pub fn pending_restart(&self) -> Option<PendingRestart> {
        self.pending_restart.lock().clone()
    }

    pub fn cancel_pending(&self) -> bool {
        self.pending_restart.lock().take().is_some()
    }

    /// Execute the staged restart (or `fallback` when none is staged):
    /// stop accepting requests, drain, then fire the shutdown signal.
    pub async fn confirm_restart(self: &Arc<Self>, fallback: RestartStrategy) -> RestartRecord {
        let strategy = self
            .pending_restart
            .lock()
            .take()
            .map(|p| p.strategy)
            .unwrap_or(fallback);
        self.shutdown(strategy).await
    }

    /// Shared shutdown path for restarts and termination signals.
    pub async fn shutdown(self: &Arc<Self>, strategy: RestartStrategy) -> RestartRecord {
        let pending_at_start = self.pending_requests();
        *self.state.write() = ServerState::Stopping;
        info!(
            strategy = ?strategy,
            pending = pending_at_start,
            "shutdown initiated"
        );

        let drained = match strategy {
            RestartStrategy::Immediate => false,
            RestartStrategy::Graceful | RestartStrategy::Rolling => {
                self.wait_for_drain(self.graceful_timeout).await
            }
        };
        if !drained && strategy != RestartStrategy::Immediate {
            warn!(
                pending = self.pending_requests(),
                "graceful timeout elapsed with requests still in flight"
            );
        }

        let record = RestartRecord {
            timestamp: Utc::now(),
            strategy,
            pending_at_start,
            drained,
            message: if drained {
                "drained cleanly".to_string()
            } else {
                format!("{} requests still pending", self.pending_requests())
            },
        };
        self.history.lock().push(record.clone());
        let _ = self.shutdown_tx.send(true);
        record
    }

    /// Poll the in-flight counter until it reaches zero or the timeout
    /// elapses. Returns whether the server fully drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.pending_requests() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn history(&self) -> Vec<RestartRecord> {
        self.history.lock().clone()
    }

    pub fn graceful_timeout(&self) -> Duration {
        self.graceful_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_counts_never_leak() {
        let manager = RestartManager::new(Duration::from_secs(1));
        assert_eq!(manager.pending_requests(), 0);
        {
            let _a = manager.begin_request().unwrap();
            let _b = manager.begin_request().unwrap();
            assert_eq!(manager.pending_requests(), 2);
        }
        assert_eq!(manager.pending_requests(), 0);
    }

    #[tokio::test]
    async fn stopping_refuses_new_requests() {
        let manager = RestartManager::new(Duration::from_millis(50));
        let record = manager.shutdown(RestartStrategy::Graceful).await;
        assert!(record.drained);
        assert_eq!(manager.state(), ServerState::Stopping);
        assert!(manager.begin_request().is_none());
    }

    #[tokio::test]
    async fn graceful_waits_for_inflight_then_signals() {
        let manager = RestartManager::new(Duration::from_secs(5));
        let guard = manager.begin_request().unwrap();

        let signal = manager.shutdown_signal();
        let drainer = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.shutdown(RestartStrategy::Graceful).await })
        };

        // Still pending; give the drain loop a few polls, then release.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.pending_requests(), 1);
        drop(guard);

        let record = drainer.await.unwrap();
        assert!(record.drained);
        assert_eq!(record.pending_at_start, 1);
        signal.await;
    }

    #[tokio::test]
    async fn graceful_timeout_gives_up() {
        let manager = RestartManager::new(Duration::from_millis(100));
        let _guard = manager.begin_request().unwrap();
        let record = manager.shutdown(RestartStrategy::Graceful).await;
        assert!(!record.drained);
    }

    #[tokio::test]
    async fn staged_restart_is_consumed_on_confirm() {
        let manager = RestartManager::new(Duration::from_millis(10));
        manager.prepare_restart(RestartStrategy::Immediate);
        assert!(manager.pending_restart().is_some());

        let record = manager.confirm_restart(RestartStrategy::Graceful).await;
        assert_eq!(record.strategy, RestartStrategy::Immediate);
        assert!(manager.pending_restart().is_none());
    }
}
