/// Admin API key. Only the one-way hash of the key material is retained;
/// the plaintext is returned exactly once, at creation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdminApiKey {
    pub key_id: String,
    pub key_hash: String,
    pub name: String,
    pub level: String,
    pub created_at: i64,
    pub last_used: Option<i64>,
    pub expires_at: Option<i64>,
    /// Empty means any source address.
    pub allowed_ips: Vec<String>,
    /// Glob patterns; `*` grants everything.
    pub permissions: Vec<String>,
    pub enabled: bool,
}

impl AdminApiKey {
    pub fn is_valid(&self, now: i64) -> bool {
        self.enabled && self.expires_at.is_none_or(|exp| now < exp)
    }
}
