//! Metadata store over sqlx.
//!
//! The same schema runs on an embedded sqlite file or a networked postgres
//! instance; SQL sticks to the shared subset (`$n` binds, `BIGINT`/`TEXT`/
//! `BOOLEAN`, partial unique indexes, `ON CONFLICT ... DO UPDATE`). Table
//! names carry a configurable prefix, so every statement is built at
//! runtime rather than through the compile-time macros.
//!
//! Write discipline (spec'd): filesystem first, then store, for creates;
//! store first, then filesystem, for deletes. Divergence is repaired by the
//! sync scanner.

mod cache;
mod downloads;
mod files;
mod migrations;
mod monitor;
mod rows;
mod syncs;
mod users;
mod webhooks;

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, SqlitePool};
use stockpile_config::DatabaseSection;
use tracing::info;

use crate::error::Result;

/// The two supported backends behind one handle.
#[derive(Debug, Clone)]
pub enum DbPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// Handle to the metadata store. Cheap to clone; all clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pub(crate) pool: DbPool,
    prefix: String,
}

/// Run a statement on whichever pool is active and return affected rows.
macro_rules! exec {
    ($db:expr, $sql:expr $(, $bind:expr)* $(,)?) => {
        match &$db.pool {
            $crate::db::DbPool::Sqlite(pool) => {
                sqlx::query($sql)$(.bind($bind))*.execute(pool).await?.rows_affected()
            }
            $crate::db::DbPool::Postgres(pool) => {
                sqlx::query($sql)$(.bind($bind))*.execute(pool).await?.rows_affected()
            }
        }
    };
}

/// Fetch every row as `$ty` (via `FromRow`).
macro_rules! fetch_all {
    ($db:expr, $ty:ty, $sql:expr $(, $bind:expr)* $(,)?) => {
        match &$db.pool {
            $crate::db::DbPool::Sqlite(pool) => {
                sqlx::query_as::<_, $ty>($sql)$(.bind($bind))*.fetch_all(pool).await?
            }
            $crate::db::DbPool::Postgres(pool) => {
                sqlx::query_as::<_, $ty>($sql)$(.bind($bind))*.fetch_all(pool).await?
            }
        }
    };
}

/// Fetch zero or one row as `$ty`.
macro_rules! fetch_optional {
    ($db:expr, $ty:ty, $sql:expr $(, $bind:expr)* $(,)?) => {
        match &$db.pool {
            $crate::db::DbPool::Sqlite(pool) => {
                sqlx::query_as::<_, $ty>($sql)$(.bind($bind))*.fetch_optional(pool).await?
            }
            $crate::db::DbPool::Postgres(pool) => {
                sqlx::query_as::<_, $ty>($sql)$(.bind($bind))*.fetch_optional(pool).await?
            }
        }
    };
}

/// Fetch a single row as `$ty`.
macro_rules! fetch_one {
    ($db:expr, $ty:ty, $sql:expr $(, $bind:expr)* $(,)?) => {
        match &$db.pool {
            $crate::db::DbPool::Sqlite(pool) => {
                sqlx::query_as::<_, $ty>($sql)$(.bind($bind))*.fetch_one(pool).await?
            }
            $crate::db::DbPool::Postgres(pool) => {
                sqlx::query_as::<_, $ty>($sql)$(.bind($bind))*.fetch_one(pool).await?
            }
        }
    };
}

pub(crate) use {exec, fetch_all, fetch_one, fetch_optional};

impl Database {
    /// Connect according to the configuration and apply pending migrations.
    pub async fn connect(config: &DatabaseSection) -> Result<Self> {
        let url = config.url();
        let pool = if config.is_embedded() {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let options = SqliteConnectOptions::from_str(&url)?
                .create_if_missing(true)
                .busy_timeout(Duration::from_secs(5));
            let pool = SqlitePoolOptions::new()
                .max_connections(config.pool_size)
                .max_lifetime(Some(Duration::from_secs(config.recycle_secs)))
                .connect_with(options)
                .await?;
            DbPool::Sqlite(pool)
        } else {
            let pool = PgPoolOptions::new()
                .max_connections(config.pool_size)
                .max_lifetime(Some(Duration::from_secs(config.recycle_secs)))
                .connect(&url)
                .await?;
            DbPool::Postgres(pool)
        };

        let db = Self {
            pool,
            prefix: config.table_prefix.clone(),
        };
        db.migrate().await?;
        info!(backend = db.backend_name(), "metadata store ready");
        Ok(db)
    }

    /// In-memory sqlite store for tests and ephemeral runs.
    pub async fn connect_ephemeral() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let db = Self {
            pool: DbPool::Sqlite(pool),
            prefix: String::new(),
        };
        db.migrate().await?;
        Ok(db)
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.pool {
            DbPool::Sqlite(_) => "sqlite",
            DbPool::Postgres(_) => "postgres",
        }
    }

    /// Prefixed physical table name.
    pub(crate) fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub async fn close(&self) {
        match &self.pool {
            DbPool::Sqlite(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
        }
    }

    /// Lightweight liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        exec!(self, "SELECT 1");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Database;

    #[tokio::test]
    async fn ephemeral_store_migrates_and_pings() {
        let db = Database::connect_ephemeral().await.unwrap();
        db.ping().await.unwrap();
        let versions = db.applied_versions().await.unwrap();
        assert!(!versions.is_empty());
        assert!(versions.windows(2).all(|w| w[0].version < w[1].version));
    }
}
