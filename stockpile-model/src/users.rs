use std::fmt;
use std::str::FromStr;

use crate::error::ParseEnumError;

/// An account that can authenticate against the control API.
///
/// `password_hash` is a salted one-way hash; plaintext never touches the
/// store. After `failed_attempts` crosses the lockout threshold within the
/// lockout window, `locked_until` is set and verification fails fast until
/// it passes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct User {
    pub username: String,
    #[cfg_attr(feature = "serde", serde(skip_serializing))]
    pub password_hash: String,
    pub role: String,
    pub email: Option<String>,
    pub last_login: Option<i64>,
    pub login_count: i64,
    pub failed_attempts: i64,
    pub locked_until: Option<i64>,
    pub enabled: bool,
    pub created_at: i64,
}

impl User {
    pub fn is_locked(&self, now: i64) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LoginStatus {
    Success,
    Failed,
    Locked,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStatus::Success => "success",
            LoginStatus::Failed => "failed",
            LoginStatus::Locked => "locked",
        }
    }
}

impl FromStr for LoginStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LoginStatus::Success),
            "failed" => Ok(LoginStatus::Failed),
            "locked" => Ok(LoginStatus::Locked),
            other => Err(ParseEnumError::new("login_status", other)),
        }
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only login audit entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoginLogEntry {
    pub username: String,
    pub ip: String,
    pub user_agent: String,
    pub status: LoginStatus,
    pub reason: Option<String>,
    pub timestamp: i64,
}
