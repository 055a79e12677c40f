//! Python package index adapter.
//!
//! URL grammar:
//! - `/simple/` root index, `/simple/<pkg>/` per-package index (HTML or
//!   PEP 691 JSON by `Accept`),
//! - `/packages/<hash-path>/<filename>` artifacts,
//! - `/web/<pkg>/json` and `/pypi/<pkg>/json` package metadata.
//!
//! Every upstream artifact URL — absolute (`files.pythonhosted.org`),
//! mirror-absolute, or relative (`../../packages/...`) — is rewritten to a
//! local `/packages/<full-hash-path>/<filename>` link, preserving the
//! complete hash directory segments. HTML links carry an `#egg=<pkg>-<ver>`
//! fragment; JSON `url` fields carry no fragment.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use stockpile_model::CacheStats;

use super::{MirrorAdapter, MirrorContext, MirrorRequest, MirrorResponse};
use crate::error::{CoreError, Result};
use crate::fetch::{FetchErrorKind, FetchOptions};

const SIMPLE_JSON_ACCEPT: &str = "application/vnd.pypi.simple.v1+json";
const SIMPLE_JSON_CONTENT_TYPE: &str = "application/vnd.pypi.simple.v1+json; charset=utf-8";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug)]
pub struct PypiMirror {
    context: MirrorContext,
}

impl PypiMirror {
    pub(crate) fn new(context: MirrorContext) -> Self {
        Self { context }
    }

    /// Upstream base ending in `/simple`.
    async fn simple_base(&self) -> String {
        let base = self.context.upstream_base().await;
        if base.ends_with("/simple") {
            base
        } else {
            format!("{base}/simple")
        }
    }

    /// Upstream base without a `/simple` suffix, for artifact and JSON APIs.
    async fn root_base(&self) -> String {
        let base = self.context.upstream_base().await;
        base.strip_suffix("/simple").map(str::to_string).unwrap_or(base)
    }

    async fn handle_root_index(&self) -> Result<MirrorResponse> {
        if let Some(hit) = self.context.cached("simple").await {
            return Ok(MirrorResponse::ok(hit.bytes, HTML_CONTENT_TYPE).hit());
        }

        let url = format!("{}/", self.simple_base().await);
        let response = self
            .context
            .fetch(&url, FetchOptions::accept("text/html"))
            .await?;
        let html = String::from_utf8_lossy(&response.bytes);
        let rewritten = rewrite_root_index(&html);

        self.context
            .store_cache("simple", rewritten.as_bytes(), Some(HTML_CONTENT_TYPE), self.context.ttl())
            .await;
        Ok(MirrorResponse::ok(rewritten.into_bytes(), HTML_CONTENT_TYPE))
    }

    async fn handle_simple_index(&self, package: &str, accept: Option<&str>) -> Result<MirrorResponse> {
        let package = normalize_package(package);
        let wants_json = accept.is_some_and(|a| a.contains(SIMPLE_JSON_ACCEPT));
        let want_content_type = if wants_json { SIMPLE_JSON_CONTENT_TYPE } else { HTML_CONTENT_TYPE };
        let cache_key = format!("simple/{package}");

        // One key per package; the sidecar content type distinguishes the
        // negotiated flavor, so a JSON client never receives cached HTML.
        if let Some(hit) = self.context.cached(&cache_key).await {
            if hit.content_type.as_deref() == Some(want_content_type) {
                return Ok(MirrorResponse::ok(hit.bytes, want_content_type).hit());
            }
        }

        let url = format!("{}/{package}/", self.simple_base().await);
        let response = match self.context.fetch(&url, FetchOptions::accept("text/html")).await {
            Ok(response) => response,
            Err(err) if err.kind == FetchErrorKind::NotFound => {
                return Err(CoreError::not_found(format!("package not found: {package}")));
            }
            Err(err) => return Err(err.into()),
        };
        let html = String::from_utf8_lossy(&response.bytes);

        let body = if wants_json {
            serde_json::to_string(&simple_index_to_json(&package, &html))?
        } else {
            rewrite_simple_html(&package, &html)
        };

        self.context
            .store_cache(&cache_key, body.as_bytes(), Some(want_content_type), self.context.ttl())
            .await;
        Ok(MirrorResponse::ok(body.into_bytes(), want_content_type))
    }

    async fn handle_artifact(&self, hash_path: &str) -> Result<MirrorResponse> {
        let cache_key = format!("packages/{hash_path}");
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/octet-stream").hit());
        }

        // Preferred mirror first, then the canonical file host.
        let mut candidates = vec![format!("{}/packages/{hash_path}", self.root_base().await)];
        let canonical = format!("https://files.pythonhosted.org/packages/{hash_path}");
        if !candidates.contains(&canonical) {
            candidates.push(canonical);
        }

        let options = FetchOptions {
            timeout: Some(self.context.artifact_timeout),
            ..Default::default()
        };
        let mut last_err = None;
        for url in candidates {
            match self.context.fetch(&url, options.clone()).await {
                Ok(response) => {
                    self.context
                        .store_cache(
                            &cache_key,
                            &response.bytes,
                            Some("application/octet-stream"),
                            self.context.artifact_ttl(),
                        )
                        .await;
                    return Ok(MirrorResponse::ok(
                        response.bytes.clone(),
                        "application/octet-stream",
                    ));
                }
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) => Err(err.into()),
            None => Err(CoreError::bad_gateway("no upstream configured")),
        }
    }

    async fn handle_package_json(&self, package: &str) -> Result<MirrorResponse> {
        let package = normalize_package(package);
        let cache_key = format!("web/{package}");
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, "application/json").hit());
        }

        let url = format!("{}/pypi/{package}/json", self.root_base().await);
        let response = self
            .context
            .fetch(&url, FetchOptions::accept("application/json"))
            .await?;
        let mut data: serde_json::Value = serde_json::from_slice(&response.bytes)
            .map_err(|err| CoreError::bad_gateway(format!("invalid upstream JSON: {err}")))?;
        rewrite_package_json(&mut data);
        let body = serde_json::to_string(&data)?;

        self.context
            .store_cache(&cache_key, body.as_bytes(), Some("application/json"), self.context.ttl())
            .await;
        Ok(MirrorResponse::ok(body.into_bytes(), "application/json"))
    }
}

#[async_trait]
impl MirrorAdapter for PypiMirror {
    fn kind(&self) -> &str {
        &self.context.kind
    }

    async fn handle(&self, request: MirrorRequest<'_>) -> Result<MirrorResponse> {
        let path = request.subpath.trim_matches('/');
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

        match parts.as_slice() {
            [] | ["simple"] => self.handle_root_index().await,
            ["simple", package] => self.handle_simple_index(package, request.accept).await,
            ["simple", _package, ..] => {
                // pip occasionally issues /simple/<pkg>/<file>; the trailing
                // segments are an artifact path in disguise.
                self.handle_artifact(&parts[2..].join("/")).await
            }
            ["packages", rest @ ..] if !rest.is_empty() => {
                self.handle_artifact(&rest.join("/")).await
            }
            ["web", package, ..] | ["pypi", package, ..] => {
                self.handle_package_json(package).await
            }
            ["legacy", ..] => Ok(MirrorResponse::ok(
                b"Legacy PyPI API is deprecated".to_vec(),
                "text/plain; charset=utf-8",
            )
            .with_status(410)),
            _ => Err(CoreError::not_found(format!("unknown PyPI path: {path}"))),
        }
    }

    async fn cache_stats(&self) -> Result<CacheStats> {
        self.context.stats().await
    }
}

fn normalize_package(package: &str) -> String {
    package.to_lowercase()
}

static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href=(["'])([^"']+)(["'])"#).expect("href regex"));
static ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a[^>]+href=["']([^"']+)["'][^>]*>([^<]*)</a>"#).expect("anchor regex"));

/// Extract `<hash-path>/<filename>` from any artifact URL that contains a
/// `/packages/` segment. Returns `None` for non-artifact links.
fn packages_tail(url: &str) -> Option<&str> {
    let idx = url.find("/packages/")?;
    let tail = &url[idx + "/packages/".len()..];
    let tail = tail.split('#').next().unwrap_or(tail);
    (!tail.is_empty()).then_some(tail)
}

/// Derive the version for the `#egg=` fragment from an artifact filename.
fn version_from_filename(package: &str, filename: &str) -> Option<String> {
    let mut base = filename;
    for ext in [".tar.gz", ".tar.bz2", ".tar.xz", ".whl", ".zip", ".egg"] {
        if let Some(stripped) = base.strip_suffix(ext) {
            base = stripped;
            break;
        }
    }
    let normalized_pkg = package.replace('_', "-").to_lowercase();
    let normalized_base = base.replace('_', "-").to_lowercase();
    let rest = normalized_base.strip_prefix(&format!("{normalized_pkg}-"))?;
    rest.split('-').next().map(str::to_string)
}

/// Rewrite every artifact link in a per-package simple index to the local
/// `/packages/...` path, tagging each with an `#egg=<pkg>-<ver>` fragment.
pub fn rewrite_simple_html(package: &str, html: &str) -> String {
    HREF_RE
        .replace_all(html, |caps: &regex::Captures<'_>| {
            let quote = &caps[1];
            let href = &caps[2];
            match packages_tail(href) {
                Some(tail) => {
                    let filename = tail.rsplit('/').next().unwrap_or(tail);
                    let fragment = version_from_filename(package, filename)
                        .map(|version| format!("#egg={package}-{version}"))
                        .unwrap_or_default();
                    format!("href={quote}/packages/{tail}{fragment}{quote}")
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// PEP 691 JSON projection of an upstream simple index page. `url` fields
/// are local paths with fragments stripped.
pub fn simple_index_to_json(package: &str, html: &str) -> serde_json::Value {
    let mut files = Vec::new();
    for caps in ANCHOR_RE.captures_iter(html) {
        let href = &caps[1];
        let text = caps[2].trim();

        let url = match packages_tail(href) {
            Some(tail) => format!("/packages/{tail}"),
            None => href.split('#').next().unwrap_or(href).to_string(),
        };
        let filename = if text.is_empty() {
            url.rsplit('/').next().unwrap_or("").to_string()
        } else {
            text.to_string()
        };
        files.push(json!({ "filename": filename, "url": url }));
    }

    json!({
        "meta": { "api-version": "1.0", "repository-version": "1.0" },
        "name": package,
        "files": files,
    })
}

/// Rewrite the `/simple/` root listing so every project link points back at
/// this mirror, preserving upstream order.
pub fn rewrite_root_index(html: &str) -> String {
    ANCHOR_RE
        .replace_all(html, |caps: &regex::Captures<'_>| {
            let href = &caps[1];
            let text = &caps[2];
            if href.starts_with("/simple/") {
                return caps[0].to_string();
            }
            let package = if let Some(idx) = href.find("/simple/") {
                href[idx + "/simple/".len()..].trim_end_matches('/')
            } else if href.starts_with("http") {
                href.trim_end_matches('/').rsplit('/').next().unwrap_or("")
            } else {
                return caps[0].to_string();
            };
            if package.is_empty() {
                return caps[0].to_string();
            }
            format!("<a href=\"/simple/{package}/\">{text}</a>")
        })
        .into_owned()
}

/// Rewrite `urls[].url` (and `releases` file URLs) in the package JSON API
/// payload to local `/packages/...` paths.
pub fn rewrite_package_json(data: &mut serde_json::Value) {
    fn rewrite_entry(entry: &mut serde_json::Value) {
        if let Some(url) = entry.get("url").and_then(|u| u.as_str()) {
            if let Some(tail) = packages_tail(url) {
                entry["url"] = serde_json::Value::String(format!("/packages/{tail}"));
            }
        }
    }

    if let Some(urls) = data.get_mut("urls").and_then(|u| u.as_array_mut()) {
        urls.iter_mut().for_each(rewrite_entry);
    }
    if let Some(releases) = data.get_mut("releases").and_then(|r| r.as_object_mut()) {
        for files in releases.values_mut() {
            if let Some(files) = files.as_array_mut() {
                files.iter_mut().for_each(rewrite_entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "ec/f9/7f9263c5695f4bd0023734af91bedb2ff8209e8de6ead162f35d8dc762fd";

    #[test]
    fn rewrites_relative_links_with_egg_fragment() {
        let html = format!(
            r#"<a href="../../packages/{HASH}/flask-3.1.2-py3-none-any.whl#sha256=abc">flask-3.1.2-py3-none-any.whl</a>"#
        );
        let out = rewrite_simple_html("flask", &html);
        assert!(out.contains(&format!(
            r#"href="/packages/{HASH}/flask-3.1.2-py3-none-any.whl#egg=flask-3.1.2""#
        )));
        assert!(!out.contains("sha256"));
    }

    #[test]
    fn rewrites_absolute_and_mirror_links() {
        let absolute = format!(
            r#"<a href="https://files.pythonhosted.org/packages/{HASH}/flask-3.1.2.tar.gz">x</a>"#
        );
        let out = rewrite_simple_html("flask", &absolute);
        assert!(out.contains(&format!(r#"href="/packages/{HASH}/flask-3.1.2.tar.gz#egg=flask-3.1.2""#)));

        let mirror = format!(
            r#"<a href="https://pypi.tuna.tsinghua.edu.cn/packages/{HASH}/Flask-0.1.tar.gz">x</a>"#
        );
        let out = rewrite_simple_html("flask", &mirror);
        assert!(out.contains(&format!(r#"href="/packages/{HASH}/Flask-0.1.tar.gz#egg=flask-0.1""#)));
    }

    #[test]
    fn non_artifact_links_are_untouched() {
        let html = r#"<a href="https://pypi.org/help/">help</a>"#;
        assert_eq!(rewrite_simple_html("flask", html), html);
    }

    #[test]
    fn json_projection_strips_fragments() {
        let html = format!(
            r#"<a href="../../packages/{HASH}/flask-3.1.2-py3-none-any.whl#sha256=abc">flask-3.1.2-py3-none-any.whl</a>"#
        );
        let value = simple_index_to_json("flask", &html);
        assert_eq!(value["name"], "flask");
        assert_eq!(value["meta"]["api-version"], "1.0");
        let file = &value["files"][0];
        assert_eq!(file["filename"], "flask-3.1.2-py3-none-any.whl");
        assert_eq!(
            file["url"],
            format!("/packages/{HASH}/flask-3.1.2-py3-none-any.whl")
        );
    }

    #[test]
    fn json_projection_preserves_upstream_order() {
        let html = format!(
            r#"<a href="../../packages/{HASH}/pkg-2.0.tar.gz">pkg-2.0.tar.gz</a>
               <a href="../../packages/{HASH}/pkg-1.0.tar.gz">pkg-1.0.tar.gz</a>"#
        );
        let value = simple_index_to_json("pkg", &html);
        let names: Vec<&str> = value["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["filename"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["pkg-2.0.tar.gz", "pkg-1.0.tar.gz"]);
    }

    #[test]
    fn root_index_links_point_back_home() {
        let html = r#"<a href="https://pypi.org/simple/flask/">flask</a><a href="/simple/requests/">requests</a>"#;
        let out = rewrite_root_index(html);
        assert!(out.contains(r#"<a href="/simple/flask/">flask</a>"#));
        assert!(out.contains(r#"href="/simple/requests/""#));
    }

    #[test]
    fn package_json_urls_are_localized() {
        let mut data = serde_json::json!({
            "urls": [
                {"url": format!("https://files.pythonhosted.org/packages/{HASH}/flask-3.1.2.tar.gz")}
            ],
            "releases": {
                "3.1.2": [
                    {"url": format!("https://files.pythonhosted.org/packages/{HASH}/flask-3.1.2.tar.gz")}
                ]
            }
        });
        rewrite_package_json(&mut data);
        assert_eq!(
            data["urls"][0]["url"],
            format!("/packages/{HASH}/flask-3.1.2.tar.gz")
        );
        assert_eq!(
            data["releases"]["3.1.2"][0]["url"],
            format!("/packages/{HASH}/flask-3.1.2.tar.gz")
        );
    }

    #[test]
    fn wheel_and_sdist_versions_extract() {
        assert_eq!(
            version_from_filename("flask", "flask-3.1.2-py3-none-any.whl").as_deref(),
            Some("3.1.2")
        );
        assert_eq!(
            version_from_filename("flask", "Flask-0.1.tar.gz").as_deref(),
            Some("0.1")
        );
        assert_eq!(version_from_filename("flask", "unrelated-1.0.tar.gz"), None);
    }
}
