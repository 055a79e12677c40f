//! Debian/Ubuntu archive adapter.
//!
//! Grammar: `/<distro>/dists/<suite>/...` index files (`Release`,
//! `Release.gpg`, `InRelease`, `Packages[.gz]`) and pool paths for `.deb`
//! payloads. Each configured mirror is tried in order until one answers.
//!
//! `Packages` (uncompressed) is synthesized by fetching `Packages.gz` and
//! inflating it. `InRelease` prefers the upstream file; when absent, a
//! stand-in is synthesized from the cached `Release` text with a leading
//! comment banner marking it as not cryptographically signed.

use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use stockpile_model::CacheStats;

use super::{MirrorAdapter, MirrorContext, MirrorRequest, MirrorResponse};
use crate::error::{CoreError, Result};
use crate::fetch::{FetchError, FetchErrorKind, FetchOptions, FetchResponse};

const SYNTHESIS_BANNER: &str =
    "# Note: This is a synthesized InRelease (original InRelease not available); it is not cryptographically signed.\n";

#[derive(Debug)]
pub struct AptMirror {
    context: MirrorContext,
}

#[derive(Debug, Clone)]
struct ArchivePath<'a> {
    distro: &'a str,
    suite: &'a str,
    component: &'a str,
    full: &'a str,
}

impl AptMirror {
    pub(crate) fn new(context: MirrorContext) -> Self {
        Self { context }
    }

    /// Fetch `path` from each mirror in priority order; first success wins.
    async fn fetch_any(
        &self,
        path: &str,
        options: &FetchOptions,
    ) -> std::result::Result<std::sync::Arc<FetchResponse>, FetchError> {
        let mut last_err = None;
        for base in self.context.upstream_candidates().await {
            let url = format!("{base}/{path}");
            match self.context.fetch(&url, options.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| FetchError {
            kind: FetchErrorKind::Transport,
            message: "no upstream mirrors configured".to_string(),
        }))
    }

    async fn serve_cached_or_fetch(
        &self,
        cache_key: &str,
        upstream_path: &str,
        content_type: &str,
        ttl: u64,
    ) -> Result<MirrorResponse> {
        if let Some(hit) = self.context.cached(cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, content_type).hit());
        }
        let response = self.fetch_any(upstream_path, &FetchOptions::default()).await?;
        self.context
            .store_cache(cache_key, &response.bytes, Some(content_type), ttl)
            .await;
        Ok(MirrorResponse::ok(response.bytes.clone(), content_type))
    }

    async fn handle_packages_gz(&self, archive: &ArchivePath<'_>) -> Result<MirrorResponse> {
        let arch = arch_from_path(archive.full)
            .or(self.context.entry.arch.as_deref())
            .unwrap_or("amd64");
        let cache_key = format!(
            "packages:{}:{}:{}:{arch}",
            archive.distro, archive.suite, archive.component
        );
        self.serve_cached_or_fetch(
            &cache_key,
            archive.full,
            "application/x-gzip",
            self.context.ttl(),
        )
        .await
    }

    async fn handle_packages_plain(&self, archive: &ArchivePath<'_>) -> Result<MirrorResponse> {
        // Upstreams publish the gzip form; inflate on the way through.
        let gz_path = format!("{}.gz", archive.full);
        let response = self.fetch_any(&gz_path, &FetchOptions::default()).await?;

        let mut decoder = GzDecoder::new(response.bytes.as_slice());
        let mut plain = Vec::new();
        decoder
            .read_to_end(&mut plain)
            .map_err(|err| CoreError::bad_gateway(format!("corrupt Packages.gz: {err}")))?;
        Ok(MirrorResponse::ok(plain, "text/plain"))
    }

    async fn handle_release(&self, archive: &ArchivePath<'_>) -> Result<MirrorResponse> {
        let cache_key = format!("release:{}:{}", archive.distro, archive.suite);
        let path = format!("{}/dists/{}/Release", archive.distro, archive.suite);
        self.serve_cached_or_fetch(&cache_key, &path, "text/plain", self.context.ttl())
            .await
    }

    async fn handle_release_gpg(&self, archive: &ArchivePath<'_>) -> Result<MirrorResponse> {
        let cache_key = format!("release_gpg:{}:{}", archive.distro, archive.suite);
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/pgp-signature").hit());
        }
        let path = format!("{}/dists/{}/Release.gpg", archive.distro, archive.suite);
        match self.fetch_any(&path, &FetchOptions::default()).await {
            Ok(response) => {
                self.context
                    .store_cache(&cache_key, &response.bytes, Some("application/pgp-signature"), self.context.ttl())
                    .await;
                Ok(MirrorResponse::ok(response.bytes.clone(), "application/pgp-signature"))
            }
            // A missing detached signature is an absence, not a gateway fault.
            Err(_) => Err(CoreError::not_found("Release.gpg not found")),
        }
    }

    async fn handle_inrelease(&self, archive: &ArchivePath<'_>) -> Result<MirrorResponse> {
        let cache_key = format!("inrelease:{}:{}", archive.distro, archive.suite);
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "text/plain").hit());
        }

        let path = format!("{}/dists/{}/InRelease", archive.distro, archive.suite);
        if let Ok(response) = self.fetch_any(&path, &FetchOptions::default()).await {
            self.context
                .store_cache(&cache_key, &response.bytes, Some("text/plain"), self.context.ttl())
                .await;
            return Ok(MirrorResponse::ok(response.bytes.clone(), "text/plain"));
        }

        // Fall back to a synthesized, unsigned stand-in built from Release.
        let release_key = format!("release:{}:{}", archive.distro, archive.suite);
        let release_bytes = match self.context.cached(&release_key).await {
            Some(hit) => hit.bytes,
            None => {
                let path = format!("{}/dists/{}/Release", archive.distro, archive.suite);
                self.fetch_any(&path, &FetchOptions::default()).await?.bytes.clone()
            }
        };

        let body = synthesize_inrelease(&release_bytes);
        self.context
            .store_cache(&cache_key, &body, Some("text/plain"), self.context.ttl())
            .await;
        Ok(MirrorResponse::ok(body, "text/plain"))
    }

    async fn handle_pool_file(&self, full_path: &str, distro: &str) -> Result<MirrorResponse> {
        let cache_key = format!("file:{distro}:{}", full_path.replace('/', ":"));
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/octet-stream").hit());
        }

        let options = FetchOptions {
            timeout: Some(self.context.artifact_timeout),
            ..Default::default()
        };
        let response = self.fetch_any(full_path, &options).await?;
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
}

#[async_trait]
impl MirrorAdapter for AptMirror {
    fn kind(&self) -> &str {
        &self.context.kind
    }

    async fn handle(&self, request: MirrorRequest<'_>) -> Result<MirrorResponse> {
        let path = request.subpath.trim_matches('/');
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

        // Anything that is not a dists/ index is a pool artifact.
        if parts.len() < 3 || parts.get(1) != Some(&"dists") {
            if parts.is_empty() {
                return Err(CoreError::bad_request("empty archive path"));
            }
            return self.handle_pool_file(path, parts[0]).await;
        }

        let archive = ArchivePath {
            distro: parts[0],
            suite: parts[2],
            component: parts.get(3).copied().unwrap_or(
                self.context.entry.components.first().map(String::as_str).unwrap_or("main"),
            ),
            full: path,
        };

        match parts.last().copied() {
            Some("InRelease") => self.handle_inrelease(&archive).await,
            Some("Release.gpg") => self.handle_release_gpg(&archive).await,
            Some("Release") => self.handle_release(&archive).await,
            Some("Packages.gz") => self.handle_packages_gz(&archive).await,
            Some("Packages") => self.handle_packages_plain(&archive).await,
            _ => self.handle_pool_file(path, archive.distro).await,
        }
    }

    async fn cache_stats(&self) -> Result<CacheStats> {
        self.context.stats().await
    }
}

/// `.../binary-<arch>/Packages.gz` carries the architecture in its path.
fn arch_from_path(path: &str) -> Option<&str> {
    let idx = path.find("binary-")?;
    let tail = &path[idx + "binary-".len()..];
    let arch = tail.split('/').next().unwrap_or(tail);
    (!arch.is_empty()).then_some(arch)
}

/// Prepend the unsigned-synthesis banner to the `Release` body.
pub fn synthesize_inrelease(release: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(SYNTHESIS_BANNER.len() + release.len());
    body.extend_from_slice(SYNTHESIS_BANNER.as_bytes());
    body.extend_from_slice(release);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_inrelease_starts_with_comment_banner() {
        let release = b"Origin: Ubuntu\nSuite: jammy\n";
        let body = synthesize_inrelease(release);
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("# Note: This is a synthesized InRelease"));
        assert!(text.ends_with("Origin: Ubuntu\nSuite: jammy\n"));
        assert!(text.contains("not cryptographically signed"));
    }

    #[test]
    fn arch_extraction_from_binary_dirs() {
        assert_eq!(
            arch_from_path("ubuntu/dists/jammy/main/binary-amd64/Packages.gz"),
            Some("amd64")
        );
        assert_eq!(
            arch_from_path("ubuntu/dists/jammy/main/binary-arm64/Packages"),
            Some("arm64")
        );
        assert_eq!(arch_from_path("ubuntu/dists/jammy/Release"), None);
    }

    #[test]
    fn packages_gz_inflates() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"Package: curl\n").unwrap();
        let gz = encoder.finish().unwrap();

        let mut decoder = GzDecoder::new(gz.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Package: curl\n");
    }
}
