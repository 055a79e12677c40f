use stockpile_model::SchemaVersion;
use tracing::info;

use super::{Database, DbPool, fetch_all};
use crate::error::Result;

/// One schema migration. Statements are idempotent (`IF NOT EXISTS`) but are
/// still guarded by the version table so each runs exactly once, in order,
/// inside its own transaction.
struct Migration {
    version: i64,
    description: &'static str,
    statements: fn(&Database) -> Vec<String>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "files, downloads, sync runs, cache index",
        statements: core_tables,
    },
    Migration {
        version: 2,
        description: "webhooks and delivery ledger",
        statements: webhook_tables,
    },
    Migration {
        version: 3,
        description: "monitor samples",
        statements: monitor_tables,
    },
    Migration {
        version: 4,
        description: "users and login audit",
        statements: user_tables,
    },
];

impl Database {
    pub(crate) async fn migrate(&self) -> Result<()> {
        let version_table = self.table("schema_version");
        super::exec!(
            self,
            &format!(
                "CREATE TABLE IF NOT EXISTS {version_table} (
                     version BIGINT PRIMARY KEY,
                     applied_at BIGINT NOT NULL,
                     description TEXT NOT NULL
                 )"
            )
        );

        let applied: Vec<i64> = self
            .applied_versions()
            .await?
            .into_iter()
            .map(|v| v.version)
            .collect();

        for migration in MIGRATIONS {
            if applied.contains(&migration.version) {
                continue;
            }
            self.apply(migration).await?;
            info!(
                version = migration.version,
                description = migration.description,
                "applied schema migration"
            );
        }
        Ok(())
    }

    async fn apply(&self, migration: &Migration) -> Result<()> {
        let statements = (migration.statements)(self);
        let record = format!(
            "INSERT INTO {} (version, applied_at, description) VALUES ($1, $2, $3)",
            self.table("schema_version")
        );
        let now = stockpile_model::epoch_now();

        match &self.pool {
            DbPool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for sql in &statements {
                    sqlx::query(sql).execute(&mut *tx).await?;
                }
                sqlx::query(&record)
                    .bind(migration.version)
                    .bind(now)
                    .bind(migration.description)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
            DbPool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for sql in &statements {
                    sqlx::query(sql).execute(&mut *tx).await?;
                }
                sqlx::query(&record)
                    .bind(migration.version)
                    .bind(now)
                    .bind(migration.description)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
        }
        Ok(())
    }

    pub async fn applied_versions(&self) -> Result<Vec<SchemaVersion>> {
        let sql = format!(
            "SELECT version, applied_at, description FROM {} ORDER BY version",
            self.table("schema_version")
        );
        let rows = fetch_all!(self, super::rows::SchemaVersionRow, &sql);
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

fn core_tables(db: &Database) -> Vec<String> {
    let files = db.table("files");
    let downloads = db.table("downloads");
    let sync_runs = db.table("sync_runs");
    let cache_entries = db.table("cache_entries");
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {files} (
                 file_id TEXT PRIMARY KEY,
                 path TEXT NOT NULL,
                 name TEXT NOT NULL,
                 size BIGINT NOT NULL DEFAULT 0,
                 hash TEXT,
                 mime_type TEXT,
                 is_dir BOOLEAN NOT NULL DEFAULT FALSE,
                 created_at BIGINT NOT NULL,
                 updated_at BIGINT NOT NULL,
                 last_accessed BIGINT NOT NULL,
                 download_count BIGINT NOT NULL DEFAULT 0,
                 is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                 sync_status TEXT NOT NULL DEFAULT 'pending'
             )"
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {files}_live_path
                 ON {files} (path) WHERE is_deleted = FALSE"
        ),
        format!("CREATE INDEX IF NOT EXISTS {files}_updated ON {files} (updated_at)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {downloads} (
                 id TEXT PRIMARY KEY,
                 file_path TEXT NOT NULL,
                 file_size BIGINT NOT NULL DEFAULT 0,
                 download_time BIGINT NOT NULL,
                 duration DOUBLE PRECISION NOT NULL DEFAULT 0,
                 client_ip TEXT NOT NULL DEFAULT '',
                 user_agent TEXT NOT NULL DEFAULT '',
                 success BOOLEAN NOT NULL DEFAULT TRUE,
                 error_message TEXT
             )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {downloads}_time ON {downloads} (download_time)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {sync_runs} (
                 sync_id TEXT PRIMARY KEY,
                 source_type TEXT NOT NULL,
                 source_name TEXT NOT NULL,
                 status TEXT NOT NULL DEFAULT 'pending',
                 total_files BIGINT NOT NULL DEFAULT 0,
                 synced_files BIGINT NOT NULL DEFAULT 0,
                 failed_files BIGINT NOT NULL DEFAULT 0,
                 total_size BIGINT NOT NULL DEFAULT 0,
                 synced_size BIGINT NOT NULL DEFAULT 0,
                 started_at BIGINT NOT NULL,
                 completed_at BIGINT,
                 error_message TEXT
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {cache_entries} (
                 cache_key TEXT PRIMARY KEY,
                 cache_type TEXT NOT NULL,
                 file_path TEXT,
                 file_size BIGINT NOT NULL DEFAULT 0,
                 file_hash TEXT,
                 hits BIGINT NOT NULL DEFAULT 0,
                 created_at BIGINT NOT NULL,
                 expires_at BIGINT,
                 last_hit BIGINT NOT NULL
             )"
        ),
    ]
}

fn webhook_tables(db: &Database) -> Vec<String> {
    let webhooks = db.table("webhooks");
    let deliveries = db.table("webhook_deliveries");
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {webhooks} (
                 id TEXT PRIMARY KEY,
                 name TEXT NOT NULL,
                 url TEXT NOT NULL,
                 events TEXT NOT NULL DEFAULT '[]',
                 secret TEXT,
                 enabled BOOLEAN NOT NULL DEFAULT TRUE,
                 created_at BIGINT NOT NULL,
                 updated_at BIGINT NOT NULL
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {deliveries} (
                 id TEXT PRIMARY KEY,
                 webhook_id TEXT NOT NULL,
                 event TEXT NOT NULL,
                 status TEXT NOT NULL DEFAULT 'pending',
                 status_code BIGINT,
                 response_body TEXT,
                 error_message TEXT,
                 duration_ms BIGINT,
                 retry_count BIGINT NOT NULL DEFAULT 0,
                 created_at BIGINT NOT NULL
             )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {deliveries}_webhook
                 ON {deliveries} (webhook_id, created_at)"
        ),
    ]
}

fn monitor_tables(db: &Database) -> Vec<String> {
    let samples = db.table("monitor_samples");
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {samples} (
                 timestamp BIGINT NOT NULL,
                 cpu_percent DOUBLE PRECISION NOT NULL DEFAULT 0,
                 memory_percent DOUBLE PRECISION NOT NULL DEFAULT 0,
                 disk_percent DOUBLE PRECISION NOT NULL DEFAULT 0,
                 network_rx BIGINT NOT NULL DEFAULT 0,
                 network_tx BIGINT NOT NULL DEFAULT 0,
                 active_connections BIGINT NOT NULL DEFAULT 0,
                 server_uptime BIGINT NOT NULL DEFAULT 0,
                 note TEXT
             )"
        ),
        format!("CREATE INDEX IF NOT EXISTS {samples}_time ON {samples} (timestamp)"),
    ]
}

fn user_tables(db: &Database) -> Vec<String> {
    let users = db.table("users");
    let login_logs = db.table("login_logs");
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {users} (
                 username TEXT PRIMARY KEY,
                 password_hash TEXT NOT NULL,
                 role TEXT NOT NULL DEFAULT 'admin',
                 email TEXT,
                 last_login BIGINT,
                 login_count BIGINT NOT NULL DEFAULT 0,
                 failed_attempts BIGINT NOT NULL DEFAULT 0,
                 locked_until BIGINT,
                 enabled BOOLEAN NOT NULL DEFAULT TRUE,
                 created_at BIGINT NOT NULL
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {login_logs} (
                 id TEXT PRIMARY KEY,
                 username TEXT NOT NULL,
                 ip TEXT NOT NULL DEFAULT '',
                 user_agent TEXT NOT NULL DEFAULT '',
                 status TEXT NOT NULL,
                 reason TEXT,
                 timestamp BIGINT NOT NULL
             )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {login_logs}_time ON {login_logs} (timestamp)"
        ),
    ]
}
