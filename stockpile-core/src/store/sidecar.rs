use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk companion of every cache payload: `<payload>.meta`.
///
/// Wire format is a flat JSON object; unknown fields are ignored so older
/// sidecars survive upgrades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    /// Epoch seconds at write time.
    pub cached_at: i64,
    /// Epoch seconds after which the entry is a miss.
    pub expires: i64,
    /// Payload size in bytes; must equal the payload file size.
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Upstream URL the payload was fetched from, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Sidecar {
    pub fn path_for(payload: &Path) -> PathBuf {
        let mut name = payload.file_name().unwrap_or_default().to_os_string();
        name.push(".meta");
        payload.with_file_name(name)
    }

    /// Parse a sidecar, returning `None` on corrupt contents so callers can
    /// treat the entry as a miss.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let meta: Sidecar = serde_json::from_slice(raw).ok()?;
        (meta.expires >= meta.cached_at).then_some(meta)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_path_appends_meta_suffix() {
        let payload = Path::new("/x/pypi/simple/flask");
        assert_eq!(Sidecar::path_for(payload), Path::new("/x/pypi/simple/flask.meta"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Sidecar::parse(b"not json").is_none());
        assert!(Sidecar::parse(b"{\"cached_at\": 10}").is_none());
    }

    #[test]
    fn parse_accepts_wire_format() {
        let meta = Sidecar::parse(
            br#"{"cached_at": 100, "expires": 200, "size": 7, "content_type": "text/plain"}"#,
        )
        .unwrap();
        assert_eq!(meta.size, 7);
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert_eq!(meta.url, None);
    }
}
