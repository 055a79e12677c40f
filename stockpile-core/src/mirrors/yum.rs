//! RHEL/CentOS/Rocky YUM repository adapter.
//!
//! Grammar: `/<distro>/<ver>/<repo>/<arch>/repodata/repomd.xml` plus the
//! checksum-named databases it references (`primary`, `filelists`,
//! `other`). A database request first resolves the real filename through
//! `repomd.xml` (`<data type="..."><location href="..."/>`), then fetches
//! and caches the referenced file. Anything else under the repo is proxied
//! as a plain pool file.

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use stockpile_model::CacheStats;

use super::{MirrorAdapter, MirrorContext, MirrorRequest, MirrorResponse};
use crate::error::{CoreError, Result};
use crate::fetch::FetchOptions;

#[derive(Debug)]
pub struct YumMirror {
    context: MirrorContext,
}

#[derive(Debug, Clone, Copy)]
struct RepoPath<'a> {
    distro: &'a str,
    version: &'a str,
    repo: &'a str,
    arch: &'a str,
}

impl YumMirror {
    pub(crate) fn new(context: MirrorContext) -> Self {
        Self { context }
    }

    fn repodata_url(&self, base: &str, repo: &RepoPath<'_>, file: &str) -> String {
        format!(
            "{base}/{}/{}/{}/repodata/{file}",
            repo.version, repo.repo, repo.arch
        )
    }

    async fn handle_repomd(&self, repo: &RepoPath<'_>) -> Result<MirrorResponse> {
        let cache_key = format!("repomd:{}:{}:{}:{}", repo.distro, repo.version, repo.repo, repo.arch);
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/xml").hit());
        }

        let base = self.context.upstream_base().await;
        let url = self.repodata_url(&base, repo, "repomd.xml");
        let response = self.context.fetch(&url, FetchOptions::default()).await?;
        self.context
            .store_cache(&cache_key, &response.bytes, Some("application/xml"), self.context.ttl())
            .await;
        Ok(MirrorResponse::ok(response.bytes.clone(), "application/xml"))
    }

    /// Resolve a database through repomd.xml, then fetch the referenced
    /// checksum-named file.
    async fn handle_database(&self, repo: &RepoPath<'_>, db_type: &str) -> Result<MirrorResponse> {
        let cache_key = format!(
            "{db_type}:{}:{}:{}:{}",
            repo.distro, repo.version, repo.repo, repo.arch
        );
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/x-gzip").hit());
        }

        let base = self.context.upstream_base().await;
        let repomd_url = self.repodata_url(&base, repo, "repomd.xml");
        let repomd = self.context.fetch(&repomd_url, FetchOptions::default()).await?;
        let repomd_text = String::from_utf8_lossy(&repomd.bytes);

        let href = resolve_location(&repomd_text, db_type).ok_or_else(|| {
            CoreError::bad_gateway(format!("repomd.xml lists no {db_type} database"))
        })?;
        // Hrefs are repo-relative ("repodata/<sum>-primary.xml.gz").
        let db_url = format!(
            "{base}/{}/{}/{}/{href}",
            repo.version, repo.repo, repo.arch
        );

        let options = FetchOptions {
            timeout: Some(self.context.artifact_timeout),
            ..Default::default()
        };
        let response = self.context.fetch(&db_url, options).await?;
        self.context
            .store_cache(&cache_key, &response.bytes, Some("application/x-gzip"), self.context.ttl())
            .await;
        Ok(MirrorResponse::ok(response.bytes.clone(), "application/x-gzip"))
    }

    async fn handle_repo_file(&self, repo: &RepoPath<'_>, path: &str) -> Result<MirrorResponse> {
        let cache_key = format!(
            "file:{}:{}:{}:{}",
            repo.distro,
            repo.version,
            repo.repo,
            path.replace('/', ":")
        );
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/octet-stream").hit());
        }

        let base = self.context.upstream_base().await;
        // The distro segment is ours; upstream bases already point at one.
        let upstream_path = path.split_once('/').map(|(_, rest)| rest).unwrap_or(path);
        let url = format!("{base}/{upstream_path}");
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
}

#[async_trait]
impl MirrorAdapter for YumMirror {
    fn kind(&self) -> &str {
        &self.context.kind
    }

    async fn handle(&self, request: MirrorRequest<'_>) -> Result<MirrorResponse> {
        let path = request.subpath.trim_matches('/');
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 4 {
            return Err(CoreError::bad_request(format!("invalid repo path: {path}")));
        }

        let repo = RepoPath {
            distro: parts[0],
            version: parts[1],
            repo: parts[2],
            arch: parts[3],
        };
        let rest = parts[4..].join("/");

        if rest.ends_with("repomd.xml") {
            self.handle_repomd(&repo).await
        } else if let Some(db_type) = ["primary", "filelists", "other"]
            .into_iter()
            .find(|t| rest.contains(&format!("{t}.xml.gz")))
        {
            self.handle_database(&repo, db_type).await
        } else {
            self.handle_repo_file(&repo, path).await
        }
    }

    async fn cache_stats(&self) -> Result<CacheStats> {
        self.context.stats().await
    }
}

/// Pull `<location href>` for the `<data type="...">` entry out of
/// repomd.xml.
pub fn resolve_location(repomd_xml: &str, db_type: &str) -> Option<String> {
    let mut reader = Reader::from_str(repomd_xml);
    reader.config_mut().trim_text(true);

    let mut in_wanted_data = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) | Ok(Event::Empty(tag)) => {
                let name = tag.local_name();
                if name.as_ref() == b"data" {
                    in_wanted_data = tag.attributes().flatten().any(|attr| {
                        attr.key.local_name().as_ref() == b"type"
                            && attr.value.as_ref() == db_type.as_bytes()
                    });
                } else if in_wanted_data && name.as_ref() == b"location" {
                    for attr in tag.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"href" {
                            return String::from_utf8(attr.value.into_owned()).ok();
                        }
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::resolve_location;

    const REPOMD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <data type="primary">
    <checksum type="sha256">aaaa</checksum>
    <location href="repodata/aaaa-primary.xml.gz"/>
  </data>
  <data type="filelists">
    <location href="repodata/bbbb-filelists.xml.gz"/>
  </data>
  <data type="other">
    <location href="repodata/cccc-other.xml.gz"/>
  </data>
</repomd>"#;

    #[test]
    fn resolves_checksum_named_databases() {
        assert_eq!(
            resolve_location(REPOMD, "primary").as_deref(),
            Some("repodata/aaaa-primary.xml.gz")
        );
        assert_eq!(
            resolve_location(REPOMD, "filelists").as_deref(),
            Some("repodata/bbbb-filelists.xml.gz")
        );
        assert_eq!(
            resolve_location(REPOMD, "other").as_deref(),
            Some("repodata/cccc-other.xml.gz")
        );
    }

    #[test]
    fn missing_database_type_resolves_to_none() {
        assert_eq!(resolve_location(REPOMD, "updateinfo"), None);
        assert_eq!(resolve_location("<not-xml", "primary"), None);
    }
}
