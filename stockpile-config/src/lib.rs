//! Layered configuration for the stockpile server.
//!
//! The effective configuration is built once at startup by deep-merging
//! three JSON layers, lowest precedence first:
//!
//! 1. built-in defaults,
//! 2. the settings file (`settings.json`),
//! 3. environment variables (`DB_*`, `SERVER_*`, `BASE_DIR`).
//!
//! Handlers never consult the environment or the file directly; they read
//! the typed [`Config`] record. A hot reload re-runs the merge and swaps the
//! record atomically (the server keeps it behind an `Arc`).

mod merge;
mod sections;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;

pub use merge::deep_merge;
pub use sections::*;

/// Fully resolved server configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub cache: CacheSection,
    pub mirrors: MirrorsSection,
    pub sync: SyncSection,
    pub health: HealthSection,
    pub prewarm: PrewarmSection,
    pub auth: AuthSection,
    pub monitor: MonitorSection,
    pub lifecycle: LifecycleSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            database: DatabaseSection::default(),
            cache: CacheSection::default(),
            mirrors: MirrorsSection::default(),
            sync: SyncSection::default(),
            health: HealthSection::default(),
            prewarm: PrewarmSection::default(),
            auth: AuthSection::default(),
            monitor: MonitorSection::default(),
            lifecycle: LifecycleSection::default(),
        }
    }
}

impl Config {
    /// Build the effective configuration from defaults, the settings file
    /// (if present), and the environment overlay.
    pub fn load(settings_path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut layered = serde_json::to_value(Config::default())?;

        if let Some(path) = settings_path {
            if path.exists() {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read settings from {}", path.display()))?;
                let file_value: Value = serde_json::from_str(&raw)
                    .with_context(|| format!("invalid settings file {}", path.display()))?;
                deep_merge(&mut layered, file_value);
            }
        }

        deep_merge(&mut layered, env_overlay());

        let config: Config = serde_json::from_value(layered)
            .context("settings did not match the configuration schema")?;
        Ok(config)
    }

    /// Deep-merge `patch` into the settings file and return the re-loaded
    /// configuration. The file keeps only explicit overrides, never the
    /// expanded defaults.
    pub fn save_patch(settings_path: &Path, patch: Value) -> anyhow::Result<Self> {
        let mut on_disk: Value = if settings_path.exists() {
            serde_json::from_str(&fs::read_to_string(settings_path)?)
                .unwrap_or_else(|_| Value::Object(Default::default()))
        } else {
            Value::Object(Default::default())
        };
        deep_merge(&mut on_disk, patch);

        if let Some(parent) = settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(settings_path, serde_json::to_string_pretty(&on_disk)?)
            .with_context(|| format!("failed to write {}", settings_path.display()))?;

        Self::load(Some(settings_path))
    }

    pub fn base_dir(&self) -> &Path {
        &self.server.base_dir
    }

    /// Create the directories the server writes into.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.server.base_dir)?;
        fs::create_dir_all(&self.server.state_dir)?;
        if let Some(parent) = self.server.access_log.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Environment overlay as a JSON fragment. Only variables that are actually
/// set appear, so unset variables never clobber file values.
fn env_overlay() -> Value {
    let mut server = serde_json::Map::new();
    if let Ok(host) = env::var("SERVER_HOST") {
        server.insert("host".into(), Value::String(host));
    }
    if let Ok(port) = env::var("SERVER_PORT") {
        if let Ok(port) = port.parse::<u16>() {
            server.insert("port".into(), Value::from(port));
        }
    }
    if let Ok(base) = env::var("BASE_DIR") {
        server.insert("base_dir".into(), Value::String(base));
    }

    let mut database = serde_json::Map::new();
    for (var, key) in [
        ("DB_TYPE", "db_type"),
        ("DB_PATH", "path"),
        ("DB_HOST", "host"),
        ("DB_NAME", "name"),
        ("DB_USER", "user"),
        ("DB_PASS", "password"),
        ("DB_CONN_STR", "conn_str"),
        ("DB_TABLE_PREFIX", "table_prefix"),
    ] {
        if let Ok(value) = env::var(var) {
            database.insert(key.into(), Value::String(value));
        }
    }
    if let Ok(port) = env::var("DB_PORT") {
        if let Ok(port) = port.parse::<u16>() {
            database.insert("port".into(), Value::from(port));
        }
    }

    let mut root = serde_json::Map::new();
    if !server.is_empty() {
        root.insert("server".into(), Value::Object(server));
    }
    if !database.is_empty() {
        root.insert("database".into(), Value::Object(database));
    }
    Value::Object(root)
}

/// Default settings file location relative to the working directory.
pub fn default_settings_path() -> PathBuf {
    PathBuf::from("settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let config = Config::default();
        let value = serde_json::to_value(&config).unwrap();
        let back: Config = serde_json::from_value(value).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9999}, "cache": {"default_ttl_secs": 120}}"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.cache.default_ttl_secs, 120);
        // Untouched values keep their defaults.
        assert_eq!(config.server.host, ServerSection::default().host);
    }

    #[test]
    fn save_patch_preserves_unrelated_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9000}}"#).unwrap();

        let config =
            Config::save_patch(&path, serde_json::json!({"cache": {"default_ttl_secs": 60}}))
                .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.cache.default_ttl_secs, 60);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["server"]["port"], 9000);
        assert_eq!(raw["cache"]["default_ttl_secs"], 60);
    }
}
