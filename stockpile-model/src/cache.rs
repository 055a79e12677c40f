/// Optional metadata-store index row over the on-disk content store.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheRecord {
    pub cache_key: String,
    pub cache_type: String,
    pub file_path: Option<String>,
    pub file_size: i64,
    pub file_hash: Option<String>,
    pub hits: i64,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub last_hit: i64,
}

/// Aggregate on-disk cache figures, as reported by a store walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheStats {
    pub files: u64,
    pub bytes: u64,
}

impl CacheStats {
    pub fn merge(&mut self, other: CacheStats) {
        self.files += other.files;
        self.bytes += other.bytes;
    }
}

/// One applied schema migration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchemaVersion {
    pub version: i64,
    pub applied_at: i64,
    pub description: String,
}

/// Render a byte count as `B`/`KB`/`MB`/`GB` for API payloads.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::format_size;

    #[test]
    fn formats_sizes_with_unit_breaks() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
