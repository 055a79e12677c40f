//! Endpoint handlers, grouped by resource.

pub mod admin;
pub mod cache;
pub mod config;
pub mod files;
pub mod health;
pub mod metrics;
pub mod mirrors;
pub mod monitor;
pub mod server;
pub mod stats;
pub mod sync;
pub mod upload;
pub mod user;
pub mod webhooks;

use stockpile_model::DownloadRecord;
use tracing::debug;

use crate::state::AppState;

/// Map a request path onto `(ecosystem, adapter subpath)`.
///
/// Dispatch is by the first segment when it names a configured ecosystem;
/// otherwise well-known protocol shapes are recognized so native client
/// URLs (`/simple/...`, `/v2/...`, `/<distro>/dists/...`) work without a
/// prefix. Returns `None` for plain file-tree paths.
pub fn resolve_mirror_path<'a>(path: &'a str, kinds: &[String]) -> Option<(String, &'a str)> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let (first, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));

    // Explicit ecosystem prefix: /pypi/..., /npm/..., /maven/...
    if kinds.iter().any(|k| k == first) {
        return Some((first.to_string(), rest));
    }

    // Protocol-native shapes.
    match first {
        "simple" | "packages" => return Some(("pypi".to_string(), trimmed)),
        "v2" | "token" => return Some(("docker".to_string(), trimmed)),
        _ => {}
    }

    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.len() >= 3 && segments[1] == "dists" {
        return Some(("apt".to_string(), trimmed));
    }
    if segments.len() >= 5 && segments.iter().any(|s| *s == "repodata") {
        return Some(("yum".to_string(), trimmed));
    }
    if trimmed.contains("/@v/") || trimmed.ends_with("/@latest")
        || trimmed.ends_with("/@list") || trimmed.ends_with("/@all")
    {
        return Some(("go".to_string(), trimmed));
    }

    None
}

/// Append a download record and bump the per-file counter, off the request
/// path. HTML index pages are the caller's responsibility to skip.
pub fn record_download_async(state: &AppState, record: DownloadRecord) {
    let db = state.db.clone();
    tokio::spawn(async move {
        let path = record.file_path.clone();
        if let Err(err) = db.record_download(&record).await {
            debug!(error = %err, "download record write failed");
        }
        if record.success {
            if let Err(err) = db.record_file_access(&path).await {
                debug!(error = %err, "file access bump failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::resolve_mirror_path;

    fn kinds() -> Vec<String> {
        ["pypi", "docker", "apt", "yum", "npm", "go", "maven"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn explicit_prefixes_dispatch_to_their_adapter() {
        assert_eq!(
            resolve_mirror_path("/npm/lodash", &kinds()),
            Some(("npm".to_string(), "lodash"))
        );
        assert_eq!(
            resolve_mirror_path("/maven/org/x/a.jar", &kinds()),
            Some(("maven".to_string(), "org/x/a.jar"))
        );
        assert_eq!(
            resolve_mirror_path("/pypi/simple/flask/", &kinds()),
            Some(("pypi".to_string(), "simple/flask/"))
        );
    }

    #[test]
    fn protocol_native_shapes_are_recognized() {
        assert_eq!(
            resolve_mirror_path("/simple/flask/", &kinds()),
            Some(("pypi".to_string(), "simple/flask/"))
        );
        assert_eq!(
            resolve_mirror_path("/packages/ab/cd/hash/x.whl", &kinds()),
            Some(("pypi".to_string(), "packages/ab/cd/hash/x.whl"))
        );
        assert_eq!(
            resolve_mirror_path("/v2/library/ubuntu/manifests/latest", &kinds()),
            Some(("docker".to_string(), "v2/library/ubuntu/manifests/latest"))
        );
        assert_eq!(
            resolve_mirror_path("/ubuntu/dists/jammy/InRelease", &kinds()),
            Some(("apt".to_string(), "ubuntu/dists/jammy/InRelease"))
        );
        assert_eq!(
            resolve_mirror_path("/rocky/9/baseos/x86_64/repodata/repomd.xml", &kinds()),
            Some(("yum".to_string(), "rocky/9/baseos/x86_64/repodata/repomd.xml"))
        );
        assert_eq!(
            resolve_mirror_path("/golang.org/x/net/@v/list", &kinds()),
            Some(("go".to_string(), "golang.org/x/net/@v/list"))
        );
        assert_eq!(
            resolve_mirror_path("/golang.org/x/net/@latest", &kinds()),
            Some(("go".to_string(), "golang.org/x/net/@latest"))
        );
    }

    #[test]
    fn plain_paths_fall_through_to_the_file_tree() {
        assert_eq!(resolve_mirror_path("/", &kinds()), None);
        assert_eq!(resolve_mirror_path("/docs/readme.txt", &kinds()), None);
        assert_eq!(resolve_mirror_path("/uploads/data.bin", &kinds()), None);
    }
}
