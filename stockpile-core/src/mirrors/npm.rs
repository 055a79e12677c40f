//! Node registry adapter.
//!
//! Grammar: `/<pkg>` (latest metadata), `/<pkg>/<version>`,
//! `/@scope/<pkg>`, and `/<pkg>/-/<tarball>`. Scoped names keep their
//! `@scope/` prefix in both cache keys and upstream URLs. `/-/...` service
//! paths are proxied without caching.

use async_trait::async_trait;
use stockpile_model::CacheStats;

use super::{MirrorAdapter, MirrorContext, MirrorRequest, MirrorResponse};
use crate::error::{CoreError, Result};
use crate::fetch::FetchOptions;

#[derive(Debug)]
pub struct NpmMirror {
    context: MirrorContext,
}

impl NpmMirror {
    pub(crate) fn new(context: MirrorContext) -> Self {
        Self { context }
    }

    async fn handle_metadata(&self, package: &str, version: Option<&str>) -> Result<MirrorResponse> {
        let cache_key = format!("package:{package}:{}", version.unwrap_or("latest"));
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/json").hit());
        }

        let base = self.context.upstream_base().await;
        let url = match version {
            Some(version) => format!("{base}/{package}/{version}"),
            None => format!("{base}/{package}/latest"),
        };
        let response = self
            .context
            .fetch(&url, FetchOptions::accept("application/json"))
            .await?;
        self.context
            .store_cache(&cache_key, &response.bytes, Some("application/json"), self.context.ttl())
            .await;
        Ok(MirrorResponse::ok(response.bytes.clone(), "application/json"))
    }

    async fn handle_tarball(&self, package: &str, filename: &str) -> Result<MirrorResponse> {
        let cache_key = format!("tarball:{package}:{filename}");
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/octet-stream").hit());
        }

        let base = self.context.upstream_base().await;
        let url = format!("{base}/{package}/-/{filename}");
        let options = FetchOptions {
            timeout: Some(self.context.artifact_timeout),
            ..Default::default()
        };
        let response = self.context.fetch(&url, options).await?;
        self.context
            .store_cache(
                &cache_key,
                &response.bytes,
                Some("application/octet-stream"),
                self.context.artifact_ttl(),
            )
            .await;
        Ok(MirrorResponse::ok(response.bytes.clone(), "application/octet-stream"))
    }

    /// `/-/...` service endpoints (ping, search, dist-tags) pass straight
    /// through, uncached.
    async fn handle_service(&self, path: &str) -> Result<MirrorResponse> {
        let base = self.context.upstream_base().await;
        let url = format!("{base}/{path}");
        let response = self
            .context
            .fetch(&url, FetchOptions::accept("application/json"))
            .await?;
        Ok(MirrorResponse::ok(response.bytes.clone(), "application/json"))
    }
}

#[async_trait]
impl MirrorAdapter for NpmMirror {
    fn kind(&self) -> &str {
        &self.context.kind
    }

    async fn handle(&self, request: MirrorRequest<'_>) -> Result<MirrorResponse> {
        let path = request.subpath.trim_matches('/');
        if path.is_empty() {
            return Err(CoreError::bad_request("missing package name"));
        }
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

        if parts[0] == "-" {
            return self.handle_service(path).await;
        }

        let (package, rest) = split_package(&parts)
            .ok_or_else(|| CoreError::bad_request(format!("invalid scoped package: {path}")))?;

        match rest {
            [] => self.handle_metadata(&package, None).await,
            ["-", filename] => self.handle_tarball(&package, filename).await,
            [version] => self.handle_metadata(&package, Some(version)).await,
            _ => Err(CoreError::not_found(format!("unknown registry path: {path}"))),
        }
    }

    async fn cache_stats(&self) -> Result<CacheStats> {
        self.context.stats().await
    }
}

/// Scoped packages consume two leading segments; plain names one.
fn split_package<'a>(parts: &'a [&'a str]) -> Option<(String, &'a [&'a str])> {
    if parts.first()?.starts_with('@') {
        if parts.len() < 2 {
            return None;
        }
        Some((format!("{}/{}", parts[0], parts[1]), &parts[2..]))
    } else {
        Some((parts[0].to_string(), &parts[1..]))
    }
}

#[cfg(test)]
mod tests {
    use super::split_package;

    #[test]
    fn plain_and_scoped_names_split() {
        let (pkg, rest) = split_package(&["lodash"]).unwrap();
        assert_eq!((pkg.as_str(), rest.len()), ("lodash", 0));

        let (pkg, rest) = split_package(&["@types", "node", "22.0.0"]).unwrap();
        assert_eq!(pkg, "@types/node");
        assert_eq!(rest, ["22.0.0"]);

        let (pkg, rest) = split_package(&["express", "-", "express-4.18.2.tgz"]).unwrap();
        assert_eq!(pkg, "express");
        assert_eq!(rest, ["-", "express-4.18.2.tgz"]);
    }

    #[test]
    fn bare_scope_is_invalid() {
        assert!(split_package(&["@types"]).is_none());
    }
}
