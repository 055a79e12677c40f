//! Generic HTTP mirror adapter.
//!
//! Backs every ecosystem without bespoke rewriting needs (Maven, Gradle,
//! Cargo, NuGet, CRAN, CTAN, CUDA, Pacman, ...). Lookup order: a plain
//! local file at the requested path inside the ecosystem tree, then the
//! cache, then the upstream at `base + subpath` with `Range` passthrough.
//! The cache key is the URL-encoded upstream URL; ranged (206) responses
//! are never cached.

use async_trait::async_trait;
use stockpile_model::CacheStats;

use super::{MirrorAdapter, MirrorContext, MirrorRequest, MirrorResponse};
use crate::error::{CoreError, Result};
use crate::fetch::FetchOptions;

/// Known artifact extensions and their content types; everything else is
/// served as `application/octet-stream`.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("txt", "text/plain; charset=utf-8"),
    ("md", "text/plain; charset=utf-8"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("pom", "application/xml"),
    ("yaml", "text/plain; charset=utf-8"),
    ("yml", "text/plain; charset=utf-8"),
    ("gz", "application/x-gzip"),
    ("tgz", "application/x-gzip"),
    ("bz2", "application/x-bzip2"),
    ("xz", "application/x-xz"),
    ("zst", "application/zstd"),
    ("zip", "application/zip"),
    ("jar", "application/java-archive"),
    ("war", "application/java-archive"),
    ("whl", "application/octet-stream"),
    ("deb", "application/vnd.debian.binary-package"),
    ("rpm", "application/x-rpm"),
    ("crate", "application/x-tar"),
    ("gem", "application/octet-stream"),
    ("nupkg", "application/zip"),
    ("sig", "application/pgp-signature"),
    ("asc", "application/pgp-signature"),
    ("sha256", "text/plain; charset=utf-8"),
    ("sha512", "text/plain; charset=utf-8"),
    ("iso", "application/x-iso9660-image"),
    ("exe", "application/vnd.microsoft.portable-executable"),
    ("msi", "application/x-msi"),
    ("pdf", "application/pdf"),
];

#[derive(Debug)]
pub struct HttpMirror {
    context: MirrorContext,
}

impl HttpMirror {
    pub(crate) fn new(context: MirrorContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl MirrorAdapter for HttpMirror {
    fn kind(&self) -> &str {
        &self.context.kind
    }

    async fn handle(&self, request: MirrorRequest<'_>) -> Result<MirrorResponse> {
        let path = request.subpath.trim_matches('/');
        if path.is_empty() {
            return Err(CoreError::bad_request("empty mirror path"));
        }
        let content_type = content_type_for(path);

        // Local tree first: files placed (or synced) under the ecosystem
        // directory are served without touching the upstream.
        if request.range.is_none() {
            if let Some(local) = self.context.store.local_file(&self.context.kind, path).await? {
                let bytes = tokio::fs::read(&local).await?;
                return Ok(MirrorResponse::ok(bytes, content_type).hit());
            }
        }

        let base = self.context.upstream_base().await;
        let url = format!("{base}/{path}");
        let cache_key = encode_cache_key(&url);

        if request.range.is_none() {
            if let Some(hit) = self.context.cached(&cache_key).await {
                let content_type = hit.content_type.unwrap_or_else(|| content_type.to_string());
                return Ok(MirrorResponse::ok(hit.bytes, content_type).hit());
            }
        }

        let options = FetchOptions {
            timeout: Some(self.context.artifact_timeout),
            range: request.range.map(str::to_string),
            ..Default::default()
        };
        let response = self.context.fetch(&url, options).await?;
        let effective_type = response
            .content_type
            .clone()
            .unwrap_or_else(|| content_type.to_string());

        if response.status == 206 {
            // Partial responses pass straight through and are never cached.
            let mut partial =
                MirrorResponse::ok(response.bytes.clone(), effective_type).with_status(206);
            if let Some(range) = &response.content_range {
                partial = partial.with_header("Content-Range", range.clone());
            }
            return Ok(partial);
        }

        self.context
            .store_cache(
                &cache_key,
                &response.bytes,
                Some(&effective_type),
                self.context.artifact_ttl(),
            )
            .await;
        Ok(MirrorResponse::ok(response.bytes.clone(), effective_type))
    }

    async fn cache_stats(&self) -> Result<CacheStats> {
        self.context.stats().await
    }
}

pub fn content_type_for(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().unwrap_or("");
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, ct)| *ct)
        .unwrap_or("application/octet-stream")
}

/// Percent-encode an upstream URL into a flat cache key.
fn encode_cache_key(url: &str) -> String {
    let mut key = String::with_capacity(url.len() + 8);
    for byte in url.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'_' => {
                key.push(byte as char)
            }
            other => key.push_str(&format!("%{other:02X}")),
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_table_maps_known_types() {
        assert_eq!(content_type_for("org/apache/maven/maven-core-3.9.6.jar"),
            "application/java-archive");
        assert_eq!(content_type_for("dists/stable/main/curl.deb"),
            "application/vnd.debian.binary-package");
        assert_eq!(content_type_for("README.md"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("no-extension"), "application/octet-stream");
        assert_eq!(content_type_for("weird.XYZ"), "application/octet-stream");
    }

    #[test]
    fn cache_keys_are_flat_and_reversible_enough() {
        let key = encode_cache_key("https://repo1.maven.org/maven2/a/b.jar");
        assert!(!key.contains('/'));
        assert!(key.starts_with("https%3A%2F%2Frepo1.maven.org"));
        assert!(key.ends_with("b.jar"));
    }
}
