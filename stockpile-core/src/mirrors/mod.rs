//! Per-ecosystem protocol adapters.
//!
//! Every adapter translates client URLs into cache keys and upstream
//! requests, and rewrites response links back to local paths where the
//! protocol requires it. Adapters share one [`ContentStore`], one
//! [`Fetcher`], and the failover manager's view of the active upstream.
//!
//! Common rules (all adapters):
//! - upstream 404 surfaces as 404, every other upstream failure as 502;
//! - error responses are never cached;
//! - cache writes are best-effort and never fail a response that already
//!   succeeded;
//! - download accounting happens in the server layer, which skips HTML
//!   index pages.

mod apt;
mod docker;
mod generic;
mod gomod;
mod npm;
mod pypi;
mod yum;

pub use apt::AptMirror;
pub use docker::DockerMirror;
pub use generic::{HttpMirror, content_type_for};
pub use gomod::GoProxy;
pub use npm::NpmMirror;
pub use pypi::PypiMirror;
pub use yum::YumMirror;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stockpile_config::{CacheSection, MirrorEntry, MirrorsSection};
use stockpile_model::CacheStats;
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::fetch::{FetchError, FetchOptions, FetchResponse, Fetcher};
use crate::health::FailoverManager;
use crate::store::{CacheHit, ContentStore};

/// Built-in upstreams for ecosystems that ship without explicit config.
pub const DEFAULT_UPSTREAMS: &[(&str, &str)] = &[
    ("pypi", "https://pypi.org"),
    ("docker", "https://registry-1.docker.io"),
    ("apt", "http://archive.ubuntu.com/ubuntu"),
    ("yum", "http://mirror.centos.org/centos"),
    ("npm", "https://registry.npmjs.org"),
    ("go", "https://proxy.golang.org"),
    ("maven", "https://repo1.maven.org/maven2"),
    ("gradle", "https://services.gradle.org/distributions"),
    ("cargo", "https://crates.io"),
    ("nuget", "https://api.nuget.org/v3"),
    ("gem", "https://rubygems.org"),
    ("composer", "https://repo.packagist.org"),
    ("cran", "https://cran.r-project.org"),
    ("ctan", "https://ctan.math.illinois.edu"),
    ("cuda", "https://developer.download.nvidia.com/compute/cuda/repos"),
    ("pacman", "https://mirror.archlinux.org"),
    ("alpine", "https://dl-cdn.alpinelinux.org"),
    ("node", "https://nodejs.org/dist"),
    ("rustup", "https://static.rust-lang.org"),
    ("helm", "https://charts.helm.sh"),
];

pub fn default_upstream(kind: &str) -> Option<&'static str> {
    DEFAULT_UPSTREAMS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, url)| *url)
}

/// One client request as seen by an adapter: the path below the ecosystem
/// prefix plus the headers adapters act on.
#[derive(Debug, Clone, Default)]
pub struct MirrorRequest<'a> {
    pub subpath: &'a str,
    pub accept: Option<&'a str>,
    pub range: Option<&'a str>,
    pub authorization: Option<&'a str>,
}

impl<'a> MirrorRequest<'a> {
    pub fn path(subpath: &'a str) -> Self {
        Self {
            subpath,
            ..Default::default()
        }
    }
}

/// Adapter response, fully buffered. Extra headers carry protocol fields
/// such as `Docker-Content-Digest`.
#[derive(Debug, Clone)]
pub struct MirrorResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub cache_hit: bool,
}

impl MirrorResponse {
    pub fn ok(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: content_type.into(),
            body: body.into(),
            headers: Vec::new(),
            cache_hit: false,
        }
    }

    pub fn hit(mut self) -> Self {
        self.cache_hit = true;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
pub trait MirrorAdapter: Send + Sync {
    fn kind(&self) -> &str;

    async fn handle(&self, request: MirrorRequest<'_>) -> Result<MirrorResponse>;

    async fn cache_stats(&self) -> Result<CacheStats>;
}

/// Shared plumbing handed to every adapter.
#[derive(Debug, Clone)]
pub(crate) struct MirrorContext {
    pub kind: String,
    pub store: Arc<ContentStore>,
    pub fetcher: Arc<Fetcher>,
    pub failover: Arc<FailoverManager>,
    pub entry: MirrorEntry,
    pub index_ttl_secs: u64,
    pub artifact_ttl_secs: u64,
    pub artifact_timeout: Duration,
}

impl MirrorContext {
    /// The upstream base for this ecosystem: failover's active source wins,
    /// then the configured upstream, then the built-in default.
    pub async fn upstream_base(&self) -> String {
        if let Some(url) = self.failover.active_url(&self.kind).await {
            return url.trim_end_matches('/').to_string();
        }
        self.configured_base()
    }

    pub fn configured_base(&self) -> String {
        self.entry
            .upstream_url
            .clone()
            .or_else(|| self.entry.sources.first().map(|s| s.url.clone()))
            .or_else(|| default_upstream(&self.kind).map(str::to_string))
            .unwrap_or_else(|| "https://mirror.invalid".to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// All candidate bases in failover priority order, active source first.
    /// Adapters that walk a mirror list (APT) try these in turn.
    pub async fn upstream_candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        let active = self.upstream_base().await;
        candidates.push(active.clone());
        for source in &self.entry.sources {
            let url = source.url.trim_end_matches('/').to_string();
            if !candidates.contains(&url) {
                candidates.push(url);
            }
        }
        candidates
    }

    pub async fn cached(&self, key: &str) -> Option<CacheHit> {
        match self.store.lookup(&self.kind, key).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(kind = %self.kind, key, error = %err, "cache lookup failed");
                None
            }
        }
    }

    /// Best-effort cache write; a failure is logged and swallowed so the
    /// already-fetched response still reaches the client.
    pub async fn store_cache(&self, key: &str, bytes: &[u8], content_type: Option<&str>, ttl: u64) {
        if let Err(err) = self.store.put(&self.kind, key, bytes, content_type, ttl).await {
            warn!(kind = %self.kind, key, error = %err, "cache write failed");
        }
    }

    pub async fn fetch(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> std::result::Result<Arc<FetchResponse>, FetchError> {
        self.fetcher.get(url, options).await
    }

    pub fn ttl(&self) -> u64 {
        self.entry.cache_ttl_secs.unwrap_or(self.index_ttl_secs)
    }

    pub fn artifact_ttl(&self) -> u64 {
        self.entry.cache_ttl_secs.unwrap_or(self.artifact_ttl_secs)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.store.stats(Some(&self.kind)).await
    }
}

/// Owns one adapter per configured ecosystem and routes requests to them.
pub struct MirrorRegistry {
    adapters: HashMap<String, Arc<dyn MirrorAdapter>>,
    secret_key: String,
}

impl std::fmt::Debug for MirrorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorRegistry")
            .field("kinds", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MirrorRegistry {
    pub fn new(
        mirrors: &MirrorsSection,
        cache: &CacheSection,
        secret_key: &str,
        store: Arc<ContentStore>,
        fetcher: Arc<Fetcher>,
        failover: Arc<FailoverManager>,
    ) -> Self {
        let mut adapters: HashMap<String, Arc<dyn MirrorAdapter>> = HashMap::new();
        for (kind, entry) in &mirrors.entries {
            if !entry.enabled {
                continue;
            }
            let context = MirrorContext {
                kind: kind.clone(),
                store: store.clone(),
                fetcher: fetcher.clone(),
                failover: failover.clone(),
                entry: entry.clone(),
                index_ttl_secs: cache.default_ttl_secs,
                artifact_ttl_secs: cache.artifact_ttl_secs,
                artifact_timeout: Duration::from_secs(cache.artifact_timeout_secs),
            };
            let adapter: Arc<dyn MirrorAdapter> = match kind.as_str() {
                "pypi" => Arc::new(PypiMirror::new(context)),
                "docker" => Arc::new(DockerMirror::new(context, secret_key.to_string())),
                "apt" => Arc::new(AptMirror::new(context)),
                "yum" => Arc::new(YumMirror::new(context)),
                "npm" => Arc::new(NpmMirror::new(context)),
                "go" => Arc::new(GoProxy::new(context)),
                _ => Arc::new(HttpMirror::new(context)),
            };
            adapters.insert(kind.clone(), adapter);
        }
        Self {
            adapters,
            secret_key: secret_key.to_string(),
        }
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn MirrorAdapter>> {
        self.adapters.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.adapters.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub async fn dispatch(&self, kind: &str, request: MirrorRequest<'_>) -> Result<MirrorResponse> {
        let adapter = self
            .get(kind)
            .ok_or_else(|| CoreError::not_found(format!("no mirror configured for {kind}")))?;
        adapter.handle(request).await
    }

    /// Aggregate on-disk usage across every adapter.
    pub async fn total_stats(&self) -> HashMap<String, CacheStats> {
        let mut all = HashMap::new();
        for (kind, adapter) in &self.adapters {
            match adapter.cache_stats().await {
                Ok(stats) => {
                    all.insert(kind.clone(), stats);
                }
                Err(err) => {
                    warn!(kind, error = %err, "cache stats failed");
                    all.insert(kind.clone(), CacheStats::default());
                }
            }
        }
        all
    }

    pub fn token_secret(&self) -> &str {
        &self.secret_key
    }
}
