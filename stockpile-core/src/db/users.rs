use stockpile_model::{LoginLogEntry, User, epoch_now};
use uuid::Uuid;

use super::rows::{LoginLogRow, UserRow};
use super::{Database, exec, fetch_all, fetch_one, fetch_optional};
use crate::error::{CoreError, Result};

impl Database {
    pub async fn create_user(&self, user: &User) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (username, password_hash, role, email, last_login,
                             login_count, failed_attempts, locked_until, enabled, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            self.table("users")
        );
        let result = exec_checked(self, &sql, user).await;
        match result {
            Err(CoreError::Database(err)) if is_unique_violation(&err) => Err(
                CoreError::Conflict(format!("user {} already exists", user.username)),
            ),
            other => other,
        }
    }

    pub async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let sql = format!("SELECT * FROM {} WHERE username = $1", self.table("users"));
        let row = fetch_optional!(self, UserRow, &sql, username);
        Ok(row.map(Into::into))
    }

    pub async fn set_user_password(&self, username: &str, password_hash: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET password_hash = $2 WHERE username = $1",
            self.table("users")
        );
        if exec!(self, &sql, username, password_hash) == 0 {
            return Err(CoreError::not_found(format!("user {username}")));
        }
        Ok(())
    }

    pub async fn record_login_success(&self, username: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET last_login = $2, login_count = login_count + 1,
                           failed_attempts = 0, locked_until = NULL
             WHERE username = $1",
            self.table("users")
        );
        exec!(self, &sql, username, epoch_now());
        Ok(())
    }

    /// Bump the failure counter; `locked_until` is set once the caller has
    /// decided the lockout threshold is crossed.
    pub async fn record_login_failure(
        &self,
        username: &str,
        locked_until: Option<i64>,
    ) -> Result<i64> {
        let update = format!(
            "UPDATE {} SET failed_attempts = failed_attempts + 1, locked_until = $2
             WHERE username = $1",
            self.table("users")
        );
        exec!(self, &update, username, locked_until);

        let count = format!(
            "SELECT failed_attempts FROM {} WHERE username = $1",
            self.table("users")
        );
        let (attempts,) = fetch_one!(self, (i64,), &count, username);
        Ok(attempts)
    }

    pub async fn set_user_lockout(&self, username: &str, locked_until: Option<i64>) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET locked_until = $2 WHERE username = $1",
            self.table("users")
        );
        exec!(self, &sql, username, locked_until);
        Ok(())
    }

    pub async fn insert_login_log(&self, entry: &LoginLogEntry) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, username, ip, user_agent, status, reason, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.table("login_logs")
        );
        exec!(
            self,
            &sql,
            Uuid::new_v4().to_string(),
            &entry.username,
            &entry.ip,
            &entry.user_agent,
            entry.status.as_str(),
            entry.reason.as_deref(),
            entry.timestamp,
        );
        Ok(())
    }

    /// Failed attempts for one account since `since`; drives the lockout
    /// window.
    pub async fn failed_logins_since(&self, username: &str, since: i64) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE username = $1 AND status = 'failed'
             AND timestamp >= $2",
            self.table("login_logs")
        );
        let (count,) = fetch_one!(self, (i64,), &sql, username, since);
        Ok(count)
    }

    pub async fn list_login_logs(&self, limit: i64) -> Result<Vec<LoginLogEntry>> {
        let sql = format!(
            "SELECT username, ip, user_agent, status, reason, timestamp
             FROM {} ORDER BY timestamp DESC LIMIT $1",
            self.table("login_logs")
        );
        let rows = fetch_all!(self, LoginLogRow, &sql, limit);
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

async fn exec_checked(db: &Database, sql: &str, user: &User) -> Result<()> {
    exec!(
        db,
        sql,
        &user.username,
        &user.password_hash,
        &user.role,
        user.email.as_deref(),
        user.last_login,
        user.login_count,
        user.failed_attempts,
        user.locked_until,
        user.enabled,
        user.created_at,
    );
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_model::LoginStatus;

    fn user(name: &str) -> User {
        User {
            username: name.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: "admin".to_string(),
            email: None,
            last_login: None,
            login_count: 0,
            failed_attempts: 0,
            locked_until: None,
            enabled: true,
            created_at: epoch_now(),
        }
    }

    #[tokio::test]
    async fn duplicate_usernames_conflict() {
        let db = Database::connect_ephemeral().await.unwrap();
        db.create_user(&user("alice")).await.unwrap();
        let err = db.create_user(&user("alice")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn failure_counter_and_lockout_round_trip() {
        let db = Database::connect_ephemeral().await.unwrap();
        db.create_user(&user("bob")).await.unwrap();

        assert_eq!(db.record_login_failure("bob", None).await.unwrap(), 1);
        assert_eq!(db.record_login_failure("bob", None).await.unwrap(), 2);

        let until = epoch_now() + 900;
        db.record_login_failure("bob", Some(until)).await.unwrap();
        let locked = db.get_user("bob").await.unwrap().unwrap();
        assert!(locked.is_locked(epoch_now()));

        db.record_login_success("bob").await.unwrap();
        let unlocked = db.get_user("bob").await.unwrap().unwrap();
        assert_eq!(unlocked.failed_attempts, 0);
        assert!(!unlocked.is_locked(epoch_now()));
        assert_eq!(unlocked.login_count, 1);
    }

    #[tokio::test]
    async fn login_log_is_append_only_and_ordered() {
        let db = Database::connect_ephemeral().await.unwrap();
        for (status, ts) in [(LoginStatus::Failed, 100), (LoginStatus::Success, 200)] {
            db.insert_login_log(&LoginLogEntry {
                username: "alice".to_string(),
                ip: "127.0.0.1".to_string(),
                user_agent: "curl".to_string(),
                status,
                reason: None,
                timestamp: ts,
            })
            .await
            .unwrap();
        }

        let logs = db.list_login_logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, LoginStatus::Success);
    }
}
