//! Upstream health probing and failover.
//!
//! The checker HEADs each configured source root on an interval and keeps
//! rolling statistics per source. The failover manager owns the per-
//! ecosystem priority lists: once the active source crosses the
//! consecutive-failure threshold, the next healthy source is promoted and
//! the swap is recorded. Recovery of the old source never demotes
//! automatically; a manual trigger (or restart) re-evaluates from the top
//! of the list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stockpile_config::{HealthSection, MirrorsSection, UpstreamSource};
use stockpile_model::{FailoverEvent, HealthCheckResult, HealthStatus, HealthSummary};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::fetch::Fetcher;

/// Probes slower than this are degraded even when the status is fine.
const SLOW_PROBE: Duration = Duration::from_secs(5);
const HISTORY_CAP: usize = 100;
const HISTORY_TRIM: usize = 50;

#[derive(Debug)]
struct SourceStats {
    result: HealthCheckResult,
    successes: u64,
}

/// Periodic prober with per-source rolling statistics.
#[derive(Debug)]
pub struct HealthChecker {
    fetcher: Arc<Fetcher>,
    timeout: Duration,
    results: RwLock<HashMap<String, SourceStats>>,
}

impl HealthChecker {
    pub fn new(fetcher: Arc<Fetcher>, config: &HealthSection) -> Self {
        Self {
            fetcher,
            timeout: Duration::from_secs(config.timeout_secs),
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Probe one source root and fold the outcome into its rolling stats.
    pub async fn check_source(&self, source_name: &str, url: &str) -> HealthCheckResult {
        let probe_url = format!("{}/", url.trim_end_matches('/'));
        let started = std::time::Instant::now();
        let outcome = self.fetcher.head(&probe_url, self.timeout).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        let (status, http_status, error_message) = match outcome {
            Ok(code) if (200..400).contains(&code) => {
                if elapsed > SLOW_PROBE {
                    (HealthStatus::Degraded, Some(code), None)
                } else {
                    (HealthStatus::Healthy, Some(code), None)
                }
            }
            Ok(code) if (400..500).contains(&code) => {
                (HealthStatus::Degraded, Some(code), Some(format!("HTTP {code}")))
            }
            Ok(code) => (HealthStatus::Unhealthy, Some(code), Some(format!("HTTP {code}"))),
            Err(err) => (HealthStatus::Unhealthy, None, Some(err.to_string())),
        };

        let mut results = self.results.write().await;
        let stats = results
            .entry(source_name.to_string())
            .or_insert_with(|| SourceStats {
                result: HealthCheckResult::unknown(source_name),
                successes: 0,
            });

        stats.result.total_checks += 1;
        if status == HealthStatus::Unhealthy {
            stats.result.consecutive_failures += 1;
        } else {
            stats.result.consecutive_failures = 0;
            stats.successes += 1;
        }
        let n = stats.result.total_checks as f64;
        stats.result.avg_response_time_ms =
            (stats.result.avg_response_time_ms * (n - 1.0) + elapsed_ms) / n;
        stats.result.success_rate = stats.successes as f64 / n * 100.0;
        stats.result.status = status;
        stats.result.response_time_ms = elapsed_ms;
        stats.result.http_status = http_status;
        stats.result.error_message = error_message;
        stats.result.last_check = Some(Utc::now());

        stats.result.clone()
    }

    pub async fn result_for(&self, source_name: &str) -> Option<HealthCheckResult> {
        self.results
            .read()
            .await
            .get(source_name)
            .map(|s| s.result.clone())
    }

    pub async fn all_results(&self) -> Vec<HealthCheckResult> {
        let mut results: Vec<HealthCheckResult> = self
            .results
            .read()
            .await
            .values()
            .map(|s| s.result.clone())
            .collect();
        results.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        results
    }

    pub async fn summary(&self) -> HealthSummary {
        let results = self.results.read().await;
        let total = results.len();
        let mut summary = HealthSummary {
            total_sources: total,
            ..Default::default()
        };
        let mut time_sum = 0.0;
        for stats in results.values() {
            match stats.result.status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
                HealthStatus::Unknown => {}
            }
            time_sum += stats.result.avg_response_time_ms;
        }
        if total > 0 {
            summary.avg_response_time_ms = time_sum / total as f64;
        }
        summary
    }
}

/// Per-ecosystem active-source selection.
#[derive(Debug)]
pub struct FailoverManager {
    enabled: bool,
    threshold: u32,
    priority: HashMap<String, Vec<UpstreamSource>>,
    active: RwLock<HashMap<String, String>>,
    history: Mutex<Vec<FailoverEvent>>,
}

impl FailoverManager {
    pub fn new(health: &HealthSection, mirrors: &MirrorsSection) -> Self {
        let mut priority = HashMap::new();
        let mut active = HashMap::new();
        for (kind, entry) in &mirrors.entries {
            if entry.sources.is_empty() {
                continue;
            }
            active.insert(kind.clone(), entry.sources[0].name.clone());
            priority.insert(kind.clone(), entry.sources.clone());
        }
        Self {
            enabled: health.failover_enabled,
            threshold: health.failure_threshold,
            priority,
            active: RwLock::new(active),
            history: Mutex::new(Vec::new()),
        }
    }

    /// `(kind, source_name, url)` tuples for everything worth probing.
    pub fn probes(&self) -> Vec<(String, String, String)> {
        let mut probes = Vec::new();
        for (kind, sources) in &self.priority {
            for source in sources {
                probes.push((kind.clone(), source.name.clone(), source.url.clone()));
            }
        }
        probes.sort();
        probes
    }

    /// URL of the active source for `kind`, when one is tracked.
    pub async fn active_url(&self, kind: &str) -> Option<String> {
        let active = self.active.read().await;
        let name = active.get(kind)?;
        self.priority
            .get(kind)?
            .iter()
            .find(|s| &s.name == name)
            .map(|s| s.url.clone())
    }

    pub async fn active_sources(&self) -> HashMap<String, String> {
        self.active.read().await.clone()
    }

    /// Evaluate the active source of `kind` after a probe round; promote the
    /// next healthy source once the failure threshold is crossed.
    pub async fn evaluate(&self, kind: &str, checker: &HealthChecker) -> Option<FailoverEvent> {
        if !self.enabled {
            return None;
        }
        let sources = self.priority.get(kind)?;
        let active_name = self.active.read().await.get(kind)?.clone();
        let active_result = checker.result_for(&active_name).await?;
        if active_result.consecutive_failures < self.threshold {
            return None;
        }

        let active_idx = sources.iter().position(|s| s.name == active_name)?;
        for candidate in &sources[active_idx + 1..] {
            let healthy = checker
                .result_for(&candidate.name)
                .await
                .is_some_and(|r| r.status == HealthStatus::Healthy);
            if !healthy {
                continue;
            }

            let event = FailoverEvent {
                timestamp: Utc::now(),
                mirror_type: kind.to_string(),
                old_source: Some(active_name.clone()),
                new_source: candidate.name.clone(),
                reason: format!(
                    "{active_name} failed {} consecutive health checks",
                    active_result.consecutive_failures
                ),
            };
            self.active
                .write()
                .await
                .insert(kind.to_string(), candidate.name.clone());
            info!(
                kind,
                old = %active_name,
                new = %candidate.name,
                "failover: promoted next healthy source"
            );
            self.push_history(event.clone()).await;
            return Some(event);
        }

        warn!(kind, active = %active_name, "failover wanted but no healthy source available");
        None
    }

    /// Manual re-evaluation: pick the first healthy source from the top of
    /// the priority list, regardless of the current active source.
    pub async fn reevaluate(&self, kind: &str, checker: &HealthChecker) -> Option<FailoverEvent> {
        let sources = self.priority.get(kind)?;
        let current = self.active.read().await.get(kind).cloned();
        for candidate in sources {
            let healthy = checker
                .result_for(&candidate.name)
                .await
                .is_none_or(|r| r.status == HealthStatus::Healthy);
            if !healthy {
                continue;
            }
            if current.as_deref() == Some(candidate.name.as_str()) {
                return None;
            }
            let event = FailoverEvent {
                timestamp: Utc::now(),
                mirror_type: kind.to_string(),
                old_source: current.clone(),
                new_source: candidate.name.clone(),
                reason: "manual re-evaluation".to_string(),
            };
            self.active
                .write()
                .await
                .insert(kind.to_string(), candidate.name.clone());
            self.push_history(event.clone()).await;
            return Some(event);
        }
        None
    }

    async fn push_history(&self, event: FailoverEvent) {
        let mut history = self.history.lock().await;
        history.push(event);
        if history.len() > HISTORY_CAP {
            let drop = history.len() - HISTORY_TRIM;
            history.drain(..drop);
        }
    }

    pub async fn history(&self, limit: usize) -> Vec<FailoverEvent> {
        let history = self.history.lock().await;
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.priority.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// Background probe loop: check every source, then evaluate failover per
/// ecosystem. Never propagates errors; logs and keeps ticking.
pub async fn run_health_loop(
    checker: Arc<HealthChecker>,
    failover: Arc<FailoverManager>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for (kind, source_name, url) in failover.probes() {
            let result = checker.check_source(&source_name, &url).await;
            if result.status != HealthStatus::Healthy {
                warn!(
                    kind,
                    source = %source_name,
                    status = result.status.as_str(),
                    "health probe not healthy"
                );
            }
        }
        for kind in failover.kinds() {
            failover.evaluate(&kind, &checker).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_config::MirrorEntry;

    fn mirrors_with_sources() -> MirrorsSection {
        let mut mirrors = MirrorsSection::default();
        mirrors.entries.insert(
            "pypi".to_string(),
            MirrorEntry {
                sources: vec![
                    UpstreamSource {
                        name: "u1".to_string(),
                        url: "https://u1.example".to_string(),
                    },
                    UpstreamSource {
                        name: "u2".to_string(),
                        url: "https://u2.example".to_string(),
                    },
                ],
                ..MirrorEntry::default()
            },
        );
        mirrors
    }

    fn checker() -> HealthChecker {
        let fetcher = Arc::new(
            Fetcher::new("test", Duration::from_secs(1), 2, 1).unwrap(),
        );
        HealthChecker::new(fetcher, &HealthSection::default())
    }

    async fn seed(checker: &HealthChecker, name: &str, status: HealthStatus, failures: u32) {
        let mut results = checker.results.write().await;
        let mut result = HealthCheckResult::unknown(name);
        result.status = status;
        result.consecutive_failures = failures;
        result.total_checks = failures as u64 + 1;
        results.insert(
            name.to_string(),
            SourceStats {
                result,
                successes: 1,
            },
        );
    }

    #[tokio::test]
    async fn failover_promotes_next_healthy_after_threshold() {
        let checker = checker();
        let failover = FailoverManager::new(&HealthSection::default(), &mirrors_with_sources());

        seed(&checker, "u1", HealthStatus::Unhealthy, 3).await;
        seed(&checker, "u2", HealthStatus::Healthy, 0).await;

        let event = failover.evaluate("pypi", &checker).await.unwrap();
        assert_eq!(event.old_source.as_deref(), Some("u1"));
        assert_eq!(event.new_source, "u2");
        assert_eq!(
            failover.active_url("pypi").await.as_deref(),
            Some("https://u2.example")
        );
        assert_eq!(failover.history(10).await.len(), 1);
    }

    #[tokio::test]
    async fn no_failover_below_threshold() {
        let checker = checker();
        let failover = FailoverManager::new(&HealthSection::default(), &mirrors_with_sources());

        seed(&checker, "u1", HealthStatus::Unhealthy, 2).await;
        seed(&checker, "u2", HealthStatus::Healthy, 0).await;

        assert!(failover.evaluate("pypi", &checker).await.is_none());
        assert_eq!(
            failover.active_url("pypi").await.as_deref(),
            Some("https://u1.example")
        );
    }

    #[tokio::test]
    async fn no_automatic_demotion_after_recovery() {
        let checker = checker();
        let failover = FailoverManager::new(&HealthSection::default(), &mirrors_with_sources());

        seed(&checker, "u1", HealthStatus::Unhealthy, 3).await;
        seed(&checker, "u2", HealthStatus::Healthy, 0).await;
        failover.evaluate("pypi", &checker).await.unwrap();

        // u1 comes back; the active source stays u2 until a manual trigger.
        seed(&checker, "u1", HealthStatus::Healthy, 0).await;
        assert!(failover.evaluate("pypi", &checker).await.is_none());
        assert_eq!(
            failover.active_url("pypi").await.as_deref(),
            Some("https://u2.example")
        );

        let event = failover.reevaluate("pypi", &checker).await.unwrap();
        assert_eq!(event.new_source, "u1");
        assert_eq!(
            failover.active_url("pypi").await.as_deref(),
            Some("https://u1.example")
        );
    }
}
