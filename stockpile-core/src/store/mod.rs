//! Content store: payload files plus `.meta` JSON sidecars under the server
//! base directory.
//!
//! Layout rules:
//! - keys containing `/` are stored at their ecosystem-native relative path
//!   (`<base>/<namespace>/<key>`), so the tree stays browsable;
//! - flat keys shard into a two-character prefix directory
//!   (`<base>/<namespace>/<k[..2]>/<key>`).
//!
//! Writes are atomic: payload goes to a `.tmp.<id>` file in the target
//! directory, is fsynced, then renamed over the destination; the sidecar is
//! written only after the payload is durable. A crash can therefore leave an
//! orphan `.tmp.*` file but never a torn payload; the sweeper removes
//! orphans.

mod sidecar;

pub use sidecar::Sidecar;

use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use stockpile_model::CacheStats;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// A successful cache lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// Seconds since the entry was written.
    pub age_secs: i64,
}

/// Result of one sweeper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_removed: u64,
    pub orphan_tmp_removed: u64,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    base: PathBuf,
}

impl ContentStore {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        let base = base.canonicalize()?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Map `(namespace, key)` to the payload path, rejecting any key that
    /// would escape the base directory.
    pub fn payload_path(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        let key = key.replace('\\', "/");
        let relative = if key.contains('/') {
            PathBuf::from(&key)
        } else {
            let shard: String = key.chars().take(2).collect();
            PathBuf::from(shard).join(&key)
        };

        let mut path = self.base.join(sanitize_component(namespace)?);
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(CoreError::BadRequest(format!(
                        "cache key escapes the store: {key}"
                    )));
                }
            }
        }
        Ok(path)
    }

    /// Look up `key`. Misses on absent payload, absent or corrupt sidecar,
    /// and expiry. Expired entries stay on disk for the sweeper.
    pub async fn lookup(&self, namespace: &str, key: &str) -> Result<Option<CacheHit>> {
        let payload = self.payload_path(namespace, key)?;
        let sidecar_path = Sidecar::path_for(&payload);

        let raw = match tokio::fs::read(&sidecar_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let Some(meta) = Sidecar::parse(&raw) else {
            warn!(key, "corrupt cache sidecar, treating as miss");
            return Ok(None);
        };

        let now = epoch_secs();
        if now >= meta.expires {
            return Ok(None);
        }

        let bytes = match tokio::fs::read(&payload).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if bytes.len() as i64 != meta.size {
            warn!(key, "cache payload size does not match sidecar, treating as miss");
            return Ok(None);
        }

        Ok(Some(CacheHit {
            bytes,
            content_type: meta.content_type,
            age_secs: now - meta.cached_at,
        }))
    }

    /// Store `bytes` under `key` with the given TTL. Payload first, sidecar
    /// second; on any failure the temp file is removed.
    pub async fn put(
        &self,
        namespace: &str,
        key: &str,
        bytes: &[u8],
        content_type: Option<&str>,
        ttl_secs: u64,
    ) -> Result<()> {
        let payload = self.payload_path(namespace, key)?;
        let dir = payload
            .parent()
            .ok_or_else(|| CoreError::internal("cache path has no parent"))?;
        tokio::fs::create_dir_all(dir).await?;

        let tmp = dir.join(format!(".tmp.{}", Uuid::new_v4().simple()));
        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &payload).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(map_write_err(err));
        }

        let now = epoch_secs();
        let meta = Sidecar {
            cached_at: now,
            expires: now + ttl_secs as i64,
            size: bytes.len() as i64,
            content_type: content_type.map(str::to_string),
            url: None,
        };
        tokio::fs::write(Sidecar::path_for(&payload), meta.to_json()?)
            .await
            .map_err(map_write_err)?;

        debug!(namespace, key, size = bytes.len(), ttl_secs, "cached");
        Ok(())
    }

    /// Remove `key` and its sidecar. Returns whether a payload existed.
    pub async fn evict(&self, namespace: &str, key: &str) -> Result<bool> {
        let payload = self.payload_path(namespace, key)?;
        let existed = match tokio::fs::remove_file(&payload).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        let _ = tokio::fs::remove_file(Sidecar::path_for(&payload)).await;
        Ok(existed)
    }

    /// Serve-direct path for the browsable tree: returns the payload path if
    /// the file exists on disk, without consulting sidecars.
    pub async fn local_file(&self, namespace: &str, subpath: &str) -> Result<Option<PathBuf>> {
        let path = self.payload_path(namespace, subpath)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Count payload files and bytes, skipping sidecars and temp files.
    /// `namespace = None` walks the whole store.
    pub async fn stats(&self, namespace: Option<&str>) -> Result<CacheStats> {
        let root = match namespace {
            Some(ns) => self.base.join(sanitize_component(ns)?),
            None => self.base.clone(),
        };
        tokio::task::spawn_blocking(move || walk_stats(&root))
            .await
            .map_err(|err| CoreError::internal(format!("stats task failed: {err}")))?
    }

    /// Remove every cached payload under one ecosystem namespace. Returns
    /// the number of payload files removed.
    pub async fn purge_namespace(&self, namespace: &str) -> Result<u64> {
        let root = self.base.join(sanitize_component(namespace)?);
        tokio::task::spawn_blocking(move || {
            if !root.exists() {
                return Ok(0);
            }
            let before = walk_stats(&root)?.files;
            std::fs::remove_dir_all(&root)?;
            Ok(before)
        })
        .await
        .map_err(|err| CoreError::internal(format!("purge task failed: {err}")))?
    }

    /// Delete expired entries and orphan temp files across the store.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let root = self.base.clone();
        tokio::task::spawn_blocking(move || sweep_tree(&root))
            .await
            .map_err(|err| CoreError::internal(format!("sweep task failed: {err}")))?
    }
}

fn sanitize_component(value: &str) -> Result<&str> {
    if value.is_empty()
        || value.contains('/')
        || value.contains('\\')
        || value == "."
        || value == ".."
    {
        return Err(CoreError::BadRequest(format!(
            "invalid store namespace: {value}"
        )));
    }
    Ok(value)
}

fn map_write_err(err: std::io::Error) -> CoreError {
    if err.raw_os_error() == Some(28) {
        CoreError::InsufficientStorage("disk full".to_string())
    } else {
        err.into()
    }
}

fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn walk_stats(root: &Path) -> Result<CacheStats> {
    let mut stats = CacheStats::default();
    if !root.exists() {
        return Ok(stats);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".meta") || name.starts_with(".tmp.") {
                continue;
            }
            stats.files += 1;
            stats.bytes += entry.metadata()?.len();
        }
    }
    Ok(stats)
}

fn sweep_tree(root: &Path) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    if !root.exists() {
        return Ok(report);
    }
    let now = epoch_secs();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();

            if name.starts_with(".tmp.") {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if std::fs::remove_file(&path).is_ok() {
                    report.orphan_tmp_removed += 1;
                    report.bytes_freed += size;
                }
                continue;
            }

            if !name.ends_with(".meta") {
                continue;
            }
            let Some(meta) = std::fs::read(&path).ok().and_then(|raw| Sidecar::parse(&raw))
            else {
                continue;
            };
            if now < meta.expires {
                continue;
            }
            let payload = dir.join(name.strip_suffix(".meta").unwrap_or(&name));
            let size = std::fs::metadata(&payload).map(|m| m.len()).unwrap_or(0);
            let _ = std::fs::remove_file(&payload);
            if std::fs::remove_file(&path).is_ok() {
                report.expired_removed += 1;
                report.bytes_freed += size;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_lookup_round_trips_within_ttl() {
        let (_dir, store) = store();
        store
            .put("pypi", "simple/flask", b"<html></html>", Some("text/html"), 60)
            .await
            .unwrap();

        let hit = store.lookup("pypi", "simple/flask").await.unwrap().unwrap();
        assert_eq!(hit.bytes, b"<html></html>");
        assert_eq!(hit.content_type.as_deref(), Some("text/html"));
        assert!(hit.age_secs >= 0);
    }

    #[tokio::test]
    async fn sidecar_size_matches_payload() {
        let (dir, store) = store();
        store.put("npm", "tarball:lodash:a.tgz", b"12345", None, 60).await.unwrap();

        let payload = store.payload_path("npm", "tarball:lodash:a.tgz").unwrap();
        let meta: Sidecar =
            Sidecar::parse(&std::fs::read(Sidecar::path_for(&payload)).unwrap()).unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(std::fs::metadata(&payload).unwrap().len(), 5);
        assert!(meta.expires > meta.cached_at);
        drop(dir);
    }

    #[tokio::test]
    async fn expired_entries_miss_but_stay_on_disk() {
        let (_dir, store) = store();
        store.put("go", "latest:x", b"{}", None, 0).await.unwrap();

        assert!(store.lookup("go", "latest:x").await.unwrap().is_none());
        let payload = store.payload_path("go", "latest:x").unwrap();
        assert!(payload.exists());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (_dir, store) = store();
        assert!(store.payload_path("pypi", "../outside").is_err());
        assert!(store.payload_path("pypi", "a/../../outside").is_err());
        assert!(store.payload_path("pypi", "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn flat_keys_shard_into_prefix_dirs() {
        let (_dir, store) = store();
        let path = store.payload_path("docker", "blob:abcdef").unwrap();
        assert!(path.ends_with("docker/bl/blob:abcdef"));
    }

    #[tokio::test]
    async fn sweep_removes_expired_and_orphan_tmp() {
        let (_dir, store) = store();
        store.put("apt", "release:ubuntu:jammy", b"Release", None, 0).await.unwrap();
        store.put("apt", "release:ubuntu:noble", b"Release", None, 600).await.unwrap();

        let orphan = store.base().join("apt").join(".tmp.deadbeef");
        std::fs::write(&orphan, b"partial").unwrap();

        let report = store.sweep().await.unwrap();
        assert_eq!(report.expired_removed, 1);
        assert_eq!(report.orphan_tmp_removed, 1);
        assert!(!orphan.exists());
        assert!(store.lookup("apt", "release:ubuntu:noble").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn evict_removes_payload_and_sidecar() {
        let (_dir, store) = store();
        store.put("yum", "repomd:rocky:9:baseos:x86_64", b"<xml/>", None, 60).await.unwrap();
        assert!(store.evict("yum", "repomd:rocky:9:baseos:x86_64").await.unwrap());
        assert!(store.lookup("yum", "repomd:rocky:9:baseos:x86_64").await.unwrap().is_none());
        assert!(!store.evict("yum", "repomd:rocky:9:baseos:x86_64").await.unwrap());
    }

    #[tokio::test]
    async fn stats_skip_sidecars_and_tmp_files() {
        let (_dir, store) = store();
        store.put("pypi", "simple/a", b"aa", None, 60).await.unwrap();
        store.put("pypi", "simple/b", b"bbbb", None, 60).await.unwrap();
        std::fs::write(store.base().join("pypi").join(".tmp.x"), b"junk").unwrap();

        let stats = store.stats(Some("pypi")).await.unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 6);
    }
}
