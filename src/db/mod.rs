//! Database module: models and schema for persistent storage.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: account records
//! - `audit.rs`: append-only audit log
//! - `settings.rs`: key/value settings

pub mod audit;
pub mod models;
pub mod schema;
pub mod settings;
pub mod sqlite;

pub use audit::AuditLog;
pub use models::{Account, AccountGrant, AuditAction, AuditEntry, AuditStatus, NewAuditEntry, Role};
pub use schema::SQLITE_INIT;
pub use settings::SettingsStorage;
pub use sqlite::{AccountsStorage, SqlitePool};

use crate::error::RallyError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

/// The three stores, sharing one connection pool.
#[derive(Clone)]
pub struct Database {
    pub accounts: AccountsStorage,
    pub audit: AuditLog,
    pub settings: SettingsStorage,
}

impl Database {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, RallyError> {
        let connect_opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(connect_opts).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database; a single connection keeps every query on it.
    pub async fn in_memory() -> Result<Self, RallyError> {
        let connect_opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_opts)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, RallyError> {
        sqlite::init_schema(&pool).await?;
        Ok(Self {
            accounts: AccountsStorage::new(pool.clone()),
            audit: AuditLog::new(pool.clone()),
            settings: SettingsStorage::new(pool),
        })
    }
}
