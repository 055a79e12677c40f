//! Control-API authentication.
//!
//! Credential sources, checked in order: `Authorization: Bearer <token>`,
//! `Authorization: Basic <user:pass>`, `X-API-Key`, the session cookie,
//! and `?key=`. The first success wins. The IP allow-list and rate limiter
//! run at router entry, before any credential is examined.
//!
//! Admin keys are stored hashed (SHA-256, one-way); the plaintext leaves
//! the process exactly once, at creation. Sessions are keyed MACs
//! (HMAC-SHA-256 over `session_id.ts.user_id`) verified in constant time.
//! Keys and sessions are persisted as JSON arrays under the state dir when
//! the embedded store is not in use.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use globset::{Glob, GlobSetBuilder};
use hmac::{Hmac, Mac};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stockpile_config::AuthSection;
use stockpile_model::{AdminApiKey, LoginLogEntry, LoginStatus, epoch_now};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{CoreError, Result};

type HmacSha256 = Hmac<Sha256>;

/// How a request authenticated; carried into handlers for auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Bearer,
    Basic,
    ApiKey,
    Cookie,
    QueryKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthIdentity {
    pub subject: String,
    pub level: String,
    pub method: AuthMethod,
}

/// Credentials extracted from one request by the router.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub bearer: Option<String>,
    pub basic: Option<(String, String)>,
    pub api_key_header: Option<String>,
    pub cookie: Option<String>,
    pub query_key: Option<String>,
    pub client_ip: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionEntry {
    session_id: String,
    user_id: String,
    level: String,
    created_at: i64,
    expires_at: i64,
}

#[derive(Debug)]
pub struct AuthManager {
    db: Database,
    config: AuthSection,
    state_dir: PathBuf,
    persist_json: bool,
    secret: Vec<u8>,
    keys: RwLock<HashMap<String, AdminApiKey>>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    rate: Mutex<HashMap<String, VecDeque<i64>>>,
    argon: Argon2<'static>,
}

impl AuthManager {
    pub fn new(db: Database, config: AuthSection, state_dir: PathBuf, persist_json: bool) -> Self {
        let secret = if config.secret_key.is_empty() {
            // Ephemeral secret: sessions die with the process, which beats
            // shipping a well-known default.
            let mut bytes = [0u8; 32];
            rand::rng().fill(&mut bytes);
            warn!("auth.secret_key not configured; sessions will not survive a restart");
            bytes.to_vec()
        } else {
            config.secret_key.clone().into_bytes()
        };

        let manager = Self {
            db,
            config,
            state_dir,
            persist_json,
            secret,
            keys: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            rate: Mutex::new(HashMap::new()),
            argon: Argon2::default(),
        };
        manager.load_state();
        manager
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    // ---- admin keys -----------------------------------------------------

    /// Create a key; the returned plaintext is shown exactly once.
    pub fn create_admin_key(
        &self,
        name: &str,
        level: &str,
        expires_days: Option<i64>,
        allowed_ips: Vec<String>,
        permissions: Vec<String>,
    ) -> (AdminApiKey, String) {
        let mut token_bytes = [0u8; 24];
        rand::rng().fill(&mut token_bytes);
        let plaintext = format!("spk_{}", hex(&token_bytes));

        let now = epoch_now();
        let key = AdminApiKey {
            key_id: Uuid::new_v4().to_string(),
            key_hash: hex(&Sha256::digest(plaintext.as_bytes())),
            name: name.to_string(),
            level: level.to_string(),
            created_at: now,
            last_used: None,
            expires_at: expires_days.map(|days| now + days * 86400),
            allowed_ips,
            permissions: if permissions.is_empty() {
                vec!["*".to_string()]
            } else {
                permissions
            },
            enabled: true,
        };
        self.keys.write().insert(key.key_id.clone(), key.clone());
        self.persist_keys();
        info!(key_id = %key.key_id, name, "admin key created");
        (key, plaintext)
    }

    pub fn delete_admin_key(&self, key_id: &str) -> bool {
        let removed = self.keys.write().remove(key_id).is_some();
        if removed {
            self.persist_keys();
        }
        removed
    }

    pub fn set_admin_key_enabled(&self, key_id: &str, enabled: bool) -> bool {
        let mut keys = self.keys.write();
        match keys.get_mut(key_id) {
            Some(key) => {
                key.enabled = enabled;
                drop(keys);
                self.persist_keys();
                true
            }
            None => false,
        }
    }

    /// Key listing for the API; hashes stay, plaintext is long gone.
    pub fn list_admin_keys(&self) -> Vec<AdminApiKey> {
        let mut keys: Vec<AdminApiKey> = self.keys.read().values().cloned().collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        keys
    }

    fn validate_key_token(&self, token: &str, client_ip: &str) -> Option<AuthIdentity> {
        let hash = hex(&Sha256::digest(token.as_bytes()));
        let now = epoch_now();
        let mut keys = self.keys.write();
        let key = keys.values_mut().find(|k| k.key_hash == hash)?;
        if !key.is_valid(now) {
            return None;
        }
        if !key.allowed_ips.is_empty() && !ip_matches(client_ip, &key.allowed_ips) {
            return None;
        }
        key.last_used = Some(now);
        Some(AuthIdentity {
            subject: key.name.clone(),
            level: key.level.clone(),
            method: AuthMethod::ApiKey,
        })
    }

    /// Glob-match a permission against a key's grants (`*` = everything).
    pub fn key_has_permission(&self, key_id: &str, permission: &str) -> bool {
        let keys = self.keys.read();
        let Some(key) = keys.get(key_id) else {
            return false;
        };
        let mut builder = GlobSetBuilder::new();
        for pattern in &key.permissions {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        builder
            .build()
            .map(|set| set.is_match(permission))
            .unwrap_or(false)
    }

    // ---- sessions -------------------------------------------------------

    /// Mint a session and return the cookie value
    /// `<session_id>.<ts>.<sig>`.
    pub fn create_session(&self, user_id: &str, level: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = epoch_now();
        let entry = SessionEntry {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            level: level.to_string(),
            created_at: now,
            expires_at: now + self.config.session_ttl_secs,
        };
        let signature = self.sign_session(&session_id, now, user_id);
        self.sessions.write().insert(session_id.clone(), entry);
        self.persist_sessions();
        format!("{session_id}.{now}.{signature}")
    }

    pub fn destroy_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            self.persist_sessions();
        }
        removed
    }

    fn validate_session_cookie(&self, value: &str) -> Option<AuthIdentity> {
        let mut parts = value.splitn(3, '.');
        let session_id = parts.next()?;
        let ts: i64 = parts.next()?.parse().ok()?;
        let signature = parts.next()?;

        let sessions = self.sessions.read();
        let entry = sessions.get(session_id)?;
        if ts != entry.created_at || epoch_now() >= entry.expires_at {
            return None;
        }

        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(format!("{session_id}.{ts}.{}", entry.user_id).as_bytes());
        let presented = hex_decode(signature)?;
        mac.verify_slice(&presented).ok()?;

        Some(AuthIdentity {
            subject: entry.user_id.clone(),
            level: entry.level.clone(),
            method: AuthMethod::Cookie,
        })
    }

    fn sign_session(&self, session_id: &str, ts: i64, user_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac key length");
        mac.update(format!("{session_id}.{ts}.{user_id}").as_bytes());
        hex(&mac.finalize().into_bytes())
    }

    // ---- passwords ------------------------------------------------------

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| CoreError::internal(format!("password hashing failed: {err}")))
    }

    pub fn verify_password_hash(&self, password: &str, hash: &str) -> bool {
        PasswordHash::new(hash)
            .map(|parsed| {
                self.argon
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Verify user credentials against the user table, falling back to the
    /// configured static account. Failures count toward lockout; the login
    /// audit log records every attempt.
    pub async fn verify_user(
        &self,
        username: &str,
        password: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<AuthIdentity> {
        let now = epoch_now();
        let log = |status: LoginStatus, reason: Option<String>| LoginLogEntry {
            username: username.to_string(),
            ip: client_ip.to_string(),
            user_agent: user_agent.to_string(),
            status,
            reason,
            timestamp: now,
        };

        if let Some(user) = self.db.get_user(username).await? {
            if !user.enabled {
                let _ = self.db.insert_login_log(&log(LoginStatus::Failed, Some("disabled".into()))).await;
                return Err(CoreError::Unauthorized("account disabled".to_string()));
            }
            if user.is_locked(now) {
                let _ = self.db.insert_login_log(&log(LoginStatus::Locked, Some("locked".into()))).await;
                return Err(CoreError::Unauthorized("account locked".to_string()));
            }
            if self.verify_password_hash(password, &user.password_hash) {
                self.db.record_login_success(username).await?;
                let _ = self.db.insert_login_log(&log(LoginStatus::Success, None)).await;
                return Ok(AuthIdentity {
                    subject: username.to_string(),
                    level: user.role,
                    method: AuthMethod::Basic,
                });
            }

            // Wrong password: bump the counter, then lock once the window
            // holds enough failures.
            let lockout = &self.config.lockout;
            self.db.record_login_failure(username, None).await?;
            self.db
                .insert_login_log(&log(LoginStatus::Failed, Some("bad password".into())))
                .await?;
            let recent = self
                .db
                .failed_logins_since(username, now - lockout.window_secs)
                .await?;
            if recent >= i64::from(lockout.max_failures) {
                let until = now + lockout.duration_secs;
                self.db.set_user_lockout(username, Some(until)).await?;
                warn!(username, recent, "account locked after repeated failures");
            }
            return Err(CoreError::Unauthorized("invalid credentials".to_string()));
        }

        // Static fallback account from the config file.
        if !self.config.admin_password.is_empty()
            && username == self.config.admin_user
            && password == self.config.admin_password
        {
            let _ = self.db.insert_login_log(&log(LoginStatus::Success, Some("static".into()))).await;
            return Ok(AuthIdentity {
                subject: username.to_string(),
                level: "admin".to_string(),
                method: AuthMethod::Basic,
            });
        }

        let _ = self
            .db
            .insert_login_log(&log(LoginStatus::Failed, Some("unknown user".into())))
            .await;
        Err(CoreError::Unauthorized("invalid credentials".to_string()))
    }

    // ---- request authentication ----------------------------------------

    /// Walk the credential sources in their specified order.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<AuthIdentity> {
        if !self.config.enabled {
            return Ok(AuthIdentity {
                subject: "anonymous".to_string(),
                level: "admin".to_string(),
                method: AuthMethod::Bearer,
            });
        }

        if let Some(token) = &credentials.bearer {
            if let Some(identity) = self.validate_key_token(token, &credentials.client_ip) {
                return Ok(AuthIdentity { method: AuthMethod::Bearer, ..identity });
            }
            if let Some(identity) = self.validate_session_cookie(token) {
                return Ok(AuthIdentity { method: AuthMethod::Bearer, ..identity });
            }
        }
        if let Some((username, password)) = &credentials.basic {
            if let Ok(identity) = self
                .verify_user(username, password, &credentials.client_ip, &credentials.user_agent)
                .await
            {
                return Ok(identity);
            }
        }
        if let Some(token) = &credentials.api_key_header {
            if let Some(identity) = self.validate_key_token(token, &credentials.client_ip) {
                return Ok(identity);
            }
        }
        if let Some(cookie) = &credentials.cookie {
            if let Some(identity) = self.validate_session_cookie(cookie) {
                return Ok(identity);
            }
        }
        if let Some(token) = &credentials.query_key {
            if let Some(identity) = self.validate_key_token(token, &credentials.client_ip) {
                return Ok(AuthIdentity { method: AuthMethod::QueryKey, ..identity });
            }
        }

        Err(CoreError::Unauthorized("authentication required".to_string()))
    }

    /// IP allow-list; evaluated before any credential when enabled.
    pub fn ip_allowed(&self, client_ip: &str) -> bool {
        if !self.config.ip_allowlist_enabled || self.config.ip_allowlist.is_empty() {
            return true;
        }
        ip_matches(client_ip, &self.config.ip_allowlist)
    }

    /// Sliding-window rate limiter keyed by caller identifier. Returns
    /// whether the request is allowed.
    pub fn check_rate(&self, identifier: &str) -> bool {
        let limits = &self.config.rate_limit;
        if !limits.enabled {
            return true;
        }
        let now = epoch_now();
        let horizon = now - limits.window_secs as i64;

        let mut buckets = self.rate.lock();
        let bucket = buckets.entry(identifier.to_string()).or_default();
        while bucket.front().is_some_and(|ts| *ts <= horizon) {
            bucket.pop_front();
        }
        if bucket.len() >= limits.max_requests as usize {
            return false;
        }
        bucket.push_back(now);
        true
    }

    // ---- persistence ----------------------------------------------------

    fn keys_path(&self) -> PathBuf {
        self.state_dir.join("admin_keys.json")
    }

    fn sessions_path(&self) -> PathBuf {
        self.state_dir.join("sessions.json")
    }

    fn load_state(&self) {
        if !self.persist_json {
            return;
        }
        if let Ok(raw) = std::fs::read(self.keys_path()) {
            if let Ok(keys) = serde_json::from_slice::<Vec<AdminApiKey>>(&raw) {
                let mut map = self.keys.write();
                for key in keys {
                    map.insert(key.key_id.clone(), key);
                }
            }
        }
        if let Ok(raw) = std::fs::read(self.sessions_path()) {
            if let Ok(sessions) = serde_json::from_slice::<Vec<SessionEntry>>(&raw) {
                let now = epoch_now();
                let mut map = self.sessions.write();
                for session in sessions {
                    if session.expires_at > now {
                        map.insert(session.session_id.clone(), session);
                    }
                }
            }
        }
    }

    fn persist_keys(&self) {
        if !self.persist_json {
            return;
        }
        let keys: Vec<AdminApiKey> = self.keys.read().values().cloned().collect();
        if let Err(err) = write_json(&self.keys_path(), &keys) {
            warn!(error = %err, "failed to persist admin keys");
        }
    }

    fn persist_sessions(&self) {
        if !self.persist_json {
            return;
        }
        let sessions: Vec<SessionEntry> = self.sessions.read().values().cloned().collect();
        if let Err(err) = write_json(&self.sessions_path(), &sessions) {
            warn!(error = %err, "failed to persist sessions");
        }
    }
}

fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(value)?)
}

/// Exact match, `*`, or prefix patterns (`10.0.` / `10.0.*`).
fn ip_matches(client_ip: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        pattern == "*"
            || pattern == client_ip
            || pattern
                .strip_suffix('*')
                .is_some_and(|prefix| client_ip.starts_with(prefix))
            || (pattern.ends_with('.') && client_ip.starts_with(pattern.as_str()))
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> AuthManager {
        let db = Database::connect_ephemeral().await.unwrap();
        let config = AuthSection {
            secret_key: "test-secret".to_string(),
            ..AuthSection::default()
        };
        AuthManager::new(db, config, PathBuf::from("/nonexistent"), false)
    }

    #[tokio::test]
    async fn session_cookie_round_trips_and_rejects_tampering() {
        let auth = manager().await;
        let cookie = auth.create_session("alice", "admin");

        let identity = auth.validate_session_cookie(&cookie).unwrap();
        assert_eq!(identity.subject, "alice");
        assert_eq!(identity.level, "admin");

        // Flip a signature nibble.
        let mut tampered = cookie.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(auth.validate_session_cookie(&tampered).is_none());

        // Unknown session id.
        assert!(auth.validate_session_cookie("nope.123.abcd").is_none());
    }

    #[tokio::test]
    async fn admin_key_lifecycle() {
        let auth = manager().await;
        let (key, plaintext) = auth.create_admin_key("ci", "admin", None, vec![], vec![]);

        assert!(plaintext.starts_with("spk_"));
        let identity = auth.validate_key_token(&plaintext, "127.0.0.1").unwrap();
        assert_eq!(identity.subject, "ci");

        auth.set_admin_key_enabled(&key.key_id, false);
        assert!(auth.validate_key_token(&plaintext, "127.0.0.1").is_none());

        auth.set_admin_key_enabled(&key.key_id, true);
        assert!(auth.delete_admin_key(&key.key_id));
        assert!(auth.validate_key_token(&plaintext, "127.0.0.1").is_none());
    }

    #[tokio::test]
    async fn key_ip_restrictions_apply() {
        let auth = manager().await;
        let (_key, plaintext) =
            auth.create_admin_key("office", "admin", None, vec!["10.1.*".to_string()], vec![]);
        assert!(auth.validate_key_token(&plaintext, "10.1.2.3").is_some());
        assert!(auth.validate_key_token(&plaintext, "192.168.0.1").is_none());
    }

    #[tokio::test]
    async fn key_permissions_glob() {
        let auth = manager().await;
        let (key, _plaintext) = auth.create_admin_key(
            "reader",
            "readonly",
            None,
            vec![],
            vec!["cache:*".to_string(), "stats:read".to_string()],
        );
        assert!(auth.key_has_permission(&key.key_id, "cache:clean"));
        assert!(auth.key_has_permission(&key.key_id, "stats:read"));
        assert!(!auth.key_has_permission(&key.key_id, "config:write"));
    }

    #[tokio::test]
    async fn lockout_after_repeated_failures() {
        let auth = manager().await;
        let hash = auth.hash_password("correct horse").unwrap();
        auth.db
            .create_user(&stockpile_model::User {
                username: "bob".to_string(),
                password_hash: hash,
                role: "admin".to_string(),
                email: None,
                last_login: None,
                login_count: 0,
                failed_attempts: 0,
                locked_until: None,
                enabled: true,
                created_at: epoch_now(),
            })
            .await
            .unwrap();

        for _ in 0..5 {
            assert!(auth.verify_user("bob", "wrong", "127.0.0.1", "t").await.is_err());
        }
        // Even the right password fails fast while locked.
        let err = auth
            .verify_user("bob", "correct horse", "127.0.0.1", "t")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(msg) if msg.contains("locked")));
    }

    #[tokio::test]
    async fn rate_limiter_enforces_window() {
        let db = Database::connect_ephemeral().await.unwrap();
        let config = AuthSection {
            secret_key: "s".to_string(),
            rate_limit: stockpile_config::RateLimitSpec {
                enabled: true,
                max_requests: 3,
                window_secs: 60,
            },
            ..AuthSection::default()
        };
        let auth = AuthManager::new(db, config, PathBuf::from("/nonexistent"), false);

        assert!(auth.check_rate("1.2.3.4"));
        assert!(auth.check_rate("1.2.3.4"));
        assert!(auth.check_rate("1.2.3.4"));
        assert!(!auth.check_rate("1.2.3.4"));
        // Another identifier has its own bucket.
        assert!(auth.check_rate("5.6.7.8"));
    }

    #[tokio::test]
    async fn credential_order_prefers_bearer() {
        let auth = manager().await;
        let (_key, plaintext) = auth.create_admin_key("k", "admin", None, vec![], vec![]);
        let cookie = auth.create_session("alice", "admin");

        let identity = auth
            .authenticate(&Credentials {
                bearer: Some(plaintext),
                cookie: Some(cookie),
                client_ip: "127.0.0.1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(identity.method, AuthMethod::Bearer);
        assert_eq!(identity.subject, "k");
    }

    #[tokio::test]
    async fn static_fallback_account_works() {
        let db = Database::connect_ephemeral().await.unwrap();
        let config = AuthSection {
            secret_key: "s".to_string(),
            admin_user: "root".to_string(),
            admin_password: "hunter2".to_string(),
            ..AuthSection::default()
        };
        let auth = AuthManager::new(db, config, PathBuf::from("/nonexistent"), false);

        assert!(auth.verify_user("root", "hunter2", "::1", "t").await.is_ok());
        assert!(auth.verify_user("root", "wrong", "::1", "t").await.is_err());
    }
}
