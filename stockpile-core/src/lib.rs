//! # Stockpile Core
//!
//! The engine behind the stockpile caching mirror server:
//!
//! - **Content store**: content-addressed payloads with TTL sidecars and
//!   atomic writes.
//! - **Fetcher**: upstream HTTP with retry, range passthrough, and
//!   single-flight coalescing per URL.
//! - **Metadata store**: sqlx-backed relational state (embedded sqlite or
//!   networked postgres) with ordered migrations.
//! - **Mirrors**: per-ecosystem protocol adapters (PyPI, Docker Registry,
//!   APT, YUM, npm, Go module proxy, generic HTTP).
//! - **Sync**: queue drain + filesystem reconciliation + cron/interval
//!   scheduled bulk pulls.
//! - **Health/failover**: upstream probing and active-source promotion.
//! - **Prewarm**: batched proactive cache fills.
//! - **Monitor**: periodic system resource samples.
//! - **Lifecycle**: in-flight tracking and graceful drain.
//! - **Auth**: admin keys, HMAC sessions, user verification, rate limiting.

pub mod auth;
pub mod db;
pub mod error;
pub mod fetch;
pub mod health;
pub mod lifecycle;
pub mod mirrors;
pub mod monitor;
pub mod prewarm;
pub mod store;
pub mod sync;

pub use db::Database;
pub use error::{CoreError, Result};
pub use fetch::Fetcher;
pub use store::ContentStore;
