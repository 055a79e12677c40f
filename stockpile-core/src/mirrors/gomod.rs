//! Go module proxy adapter.
//!
//! Grammar: `/<module>/@v/list`, `/<module>/@v/<ver>.{info,mod,zip,sum}`,
//! `/<module>/@latest`, `/<module>/@all`, `/<module>/@list`.
//!
//! Protocol quirks honored here: a 404 for a `.sum` is answered with an
//! empty 200 (absent sum is valid), and `/@list` derives the dependency
//! closure by parsing `require` directives (grouped and inline) out of the
//! module's `go.mod` at its latest version.

use async_trait::async_trait;
use stockpile_model::CacheStats;

use super::{MirrorAdapter, MirrorContext, MirrorRequest, MirrorResponse};
use crate::error::{CoreError, Result};
use crate::fetch::{FetchErrorKind, FetchOptions};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug)]
pub struct GoProxy {
    context: MirrorContext,
}

impl GoProxy {
    pub(crate) fn new(context: MirrorContext) -> Self {
        Self { context }
    }

    async fn proxy_cached(
        &self,
        cache_key: &str,
        upstream_path: &str,
        content_type: &str,
        ttl: u64,
        artifact: bool,
    ) -> Result<MirrorResponse> {
        if let Some(hit) = self.context.cached(cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, content_type).hit());
        }

        let base = self.context.upstream_base().await;
        let url = format!("{base}/{upstream_path}");
        let options = if artifact {
            FetchOptions {
                timeout: Some(self.context.artifact_timeout),
                ..Default::default()
            }
        } else {
            FetchOptions::default()
        };
        let response = self.context.fetch(&url, options).await?;
        self.context
            .store_cache(cache_key, &response.bytes, Some(content_type), ttl)
            .await;
        Ok(MirrorResponse::ok(response.bytes.clone(), content_type))
    }

    async fn handle_version_file(&self, module: &str, suffix: &str) -> Result<MirrorResponse> {
        let (version, ext) = suffix
            .rsplit_once('.')
            .ok_or_else(|| CoreError::bad_request(format!("unknown version file: {suffix}")))?;
        let upstream = format!("{module}/@v/{suffix}");
        match ext {
            "info" => {
                self.proxy_cached(
                    &format!("info:{module}:{version}"),
                    &upstream,
                    "application/json",
                    self.context.ttl(),
                    false,
                )
                .await
            }
            "mod" => {
                self.proxy_cached(
                    &format!("mod:{module}:{version}"),
                    &upstream,
                    TEXT_PLAIN,
                    self.context.artifact_ttl(),
                    false,
                )
                .await
            }
            "zip" => {
                self.proxy_cached(
                    &format!("zip:{module}:{version}"),
                    &upstream,
                    "application/zip",
                    self.context.artifact_ttl(),
                    true,
                )
                .await
            }
            "sum" => {
                match self
                    .proxy_cached(
                        &format!("sum:{module}:{version}"),
                        &upstream,
                        TEXT_PLAIN,
                        self.context.ttl(),
                        false,
                    )
                    .await
                {
                    // An absent sum is a valid, empty answer.
                    Err(CoreError::NotFound(_)) => Ok(MirrorResponse::ok(Vec::new(), TEXT_PLAIN)),
                    other => other,
                }
            }
            _ => Err(CoreError::bad_request(format!("unknown suffix: .{ext}"))),
        }
    }

    /// `/@list`: the module plus its direct requirements, one per line.
    async fn handle_module_list(&self, module: &str) -> Result<MirrorResponse> {
        let cache_key = format!("list:{module}");
        if let Some(hit) = self.context.cached(&cache_key).await {
            return Ok(MirrorResponse::ok(hit.bytes, TEXT_PLAIN).hit());
        }

        let base = self.context.upstream_base().await;

        // Resolve the latest version, then read its go.mod.
        let latest_url = format!("{base}/{module}/@latest");
        let latest = match self.context.fetch(&latest_url, FetchOptions::default()).await {
            Ok(response) => response,
            Err(err) if err.kind == FetchErrorKind::NotFound => {
                return Err(CoreError::not_found(format!("module not found: {module}")));
            }
            Err(err) => return Err(err.into()),
        };
        let info: serde_json::Value = serde_json::from_slice(&latest.bytes)
            .map_err(|err| CoreError::bad_gateway(format!("invalid @latest JSON: {err}")))?;
        let version = info
            .get("Version")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::bad_gateway("@latest carries no Version"))?;

        let mod_url = format!("{base}/{module}/@v/{version}.mod");
        let go_mod = self.context.fetch(&mod_url, FetchOptions::default()).await?;

        let mut modules = parse_go_mod_requires(&String::from_utf8_lossy(&go_mod.bytes));
        modules.push(module.to_string());
        modules.sort();
        modules.dedup();
        let mut body = modules.join("\n");
        body.push('\n');

        self.context
            .store_cache(&cache_key, body.as_bytes(), Some(TEXT_PLAIN), self.context.ttl())
            .await;
        Ok(MirrorResponse::ok(body.into_bytes(), TEXT_PLAIN))
    }
}

#[async_trait]
impl MirrorAdapter for GoProxy {
    fn kind(&self) -> &str {
        &self.context.kind
    }

    async fn handle(&self, request: MirrorRequest<'_>) -> Result<MirrorResponse> {
        let path = request.subpath.trim_matches('/');
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

        let Some(at_idx) = parts.iter().position(|p| p.starts_with('@')) else {
            return Err(CoreError::bad_request(format!("invalid module path: {path}")));
        };
        let module = parts[..at_idx].join("/");
        if module.is_empty() {
            return Err(CoreError::bad_request("missing module path"));
        }
        let action = &parts[at_idx..];

        match action {
            ["@v", "list"] => {
                self.proxy_cached(
                    &format!("vlist:{module}"),
                    &format!("{module}/@v/list"),
                    TEXT_PLAIN,
                    self.context.ttl(),
                    false,
                )
                .await
            }
            ["@v", suffix] => self.handle_version_file(&module, suffix).await,
            ["@latest"] => {
                self.proxy_cached(
                    &format!("latest:{module}"),
                    &format!("{module}/@latest"),
                    "application/json",
                    self.context.ttl(),
                    false,
                )
                .await
            }
            ["@all"] => {
                self.proxy_cached(
                    &format!("all:{module}"),
                    &format!("{module}/@all.zip"),
                    "application/zip",
                    self.context.artifact_ttl(),
                    true,
                )
                .await
            }
            ["@list"] => self.handle_module_list(&module).await,
            _ => Err(CoreError::bad_request(format!(
                "unknown module action: {}",
                action.join("/")
            ))),
        }
    }

    async fn cache_stats(&self) -> Result<CacheStats> {
        self.context.stats().await
    }
}

/// Extract required module paths from go.mod text. Handles both the
/// grouped form (`require ( ... )`) and inline `require mod v1.2.3`
/// directives; comment lines are skipped.
pub fn parse_go_mod_requires(go_mod: &str) -> Vec<String> {
    let mut modules = Vec::new();
    let mut in_require_block = false;

    for line in go_mod.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        if in_require_block {
            if line == ")" {
                in_require_block = false;
                continue;
            }
            if let Some(module) = line.split_whitespace().next() {
                modules.push(module.to_string());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("require") {
            let rest = rest.trim();
            if rest.starts_with('(') {
                in_require_block = true;
            } else if let Some(module) = rest.split_whitespace().next() {
                modules.push(module.to_string());
            }
        }
    }

    modules.sort();
    modules.dedup();
    modules
}

#[cfg(test)]
mod tests {
    use super::parse_go_mod_requires;

    #[test]
    fn grouped_and_inline_requires_parse() {
        let go_mod = r#"
module example.com/app

go 1.22

require (
    golang.org/x/net v0.30.0
    github.com/pkg/errors v0.9.1 // indirect
    // a comment line
)

require gopkg.in/yaml.v3 v3.0.1
"#;
        let modules = parse_go_mod_requires(go_mod);
        assert_eq!(
            modules,
            vec![
                "github.com/pkg/errors",
                "golang.org/x/net",
                "gopkg.in/yaml.v3",
            ]
        );
    }

    #[test]
    fn no_requires_yields_empty() {
        assert!(parse_go_mod_requires("module x\n\ngo 1.22\n").is_empty());
    }

    #[test]
    fn duplicate_requires_dedupe() {
        let go_mod = "require a.b/c v1.0.0\nrequire a.b/c v1.0.0\n";
        assert_eq!(parse_go_mod_requires(go_mod), vec!["a.b/c"]);
    }
}
