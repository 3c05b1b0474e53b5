//! Persistent storage over SQLite via SQLx.
//!
//! The core only ever touches the repository operations defined in the
//! submodules; schema details stay here. Every logical operation is bounded
//! by a 10-second timeout that surfaces as [`DbError::Timeout`], and "row
//! absent" is always a distinct typed error, never folded into I/O failure.

mod accounts;
mod admin;
mod rooms;
mod security;

pub use accounts::{Account, AccountRepository};
pub use admin::{AdminRepository, AuditEntry, Ban};
pub use rooms::{Membership, Role, Room, RoomRepository};
pub use security::{AddressRecord, LoginAttempt, SecurityRepository};

use crate::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("database operation timed out")]
    Timeout,

    #[error("user not found: {0}")]
    AccountNotFound(String),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("config key not found: {0}")]
    ConfigKeyNotFound(String),

    #[error("security record missing for account {0}")]
    SecurityRecordMissing(i64),

    #[error("username already exists: {0}")]
    UsernameExists(String),
}

/// Upper bound on any single store operation.
const OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a store operation under the global operation timeout.
pub(crate) async fn bounded<T>(
    fut: impl Future<Output = Result<T, DbError>>,
) -> Result<T, DbError> {
    tokio::time::timeout(OP_TIMEOUT, fut)
        .await
        .map_err(|_| DbError::Timeout)?
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and apply migrations.
    pub async fn new(cfg: &DatabaseConfig) -> Result<Self, DbError> {
        let options = if cfg.path == ":memory:" {
            SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true)
        } else {
            if let Some(parent) = Path::new(&cfg.path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
                    }
                }
            }
            SqliteConnectOptions::new()
                .filename(&cfg.path)
                .create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_open_conns.max(1))
            .min_connections(cfg.max_idle_conns.min(cfg.max_open_conns))
            .max_lifetime(Some(Duration::from_secs(cfg.conn_max_lifetime_secs)))
            .acquire_timeout(OP_TIMEOUT)
            .connect_with(options)
            .await?;

        info!(path = %cfg.path, "Database connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, draining checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Apply the embedded schema when the core tables are missing.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false)
        }

        let core_tables = [
            "accounts",
            "address_security",
            "login_attempts",
            "rooms",
            "room_members",
            "bans",
            "audit_log",
            "config",
        ];
        let mut core_ok = true;
        for t in core_tables {
            if !table_exists(pool, t).await {
                core_ok = false;
                break;
            }
        }

        if core_ok {
            info!("Database already initialized");
            return Ok(());
        }

        Self::run_migration_file(pool, include_str!("../../migrations/001_init.sql")).await?;
        info!("Database migrations applied (001_init)");
        Ok(())
    }

    /// Execute a migration file statement by statement.
    ///
    /// Trigger bodies contain semicolons, so statements are split on the
    /// `;` that closes them: a statement is complete when it is outside a
    /// `BEGIN ... END` block.
    async fn run_migration_file(pool: &SqlitePool, migration: &str) -> Result<(), DbError> {
        let mut statement = String::new();
        let mut in_trigger = false;

        for line in migration.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }

            statement.push_str(trimmed);
            statement.push('\n');

            let upper = trimmed.to_ascii_uppercase();
            if upper.contains("CREATE TRIGGER") {
                in_trigger = true;
            }
            if in_trigger {
                if upper.starts_with("END;") || upper == "END;" {
                    in_trigger = false;
                } else {
                    continue;
                }
            } else if !trimmed.ends_with(';') {
                continue;
            }

            sqlx::query(&statement).execute(pool).await?;
            statement.clear();
        }

        Ok(())
    }

    /// Account repository.
    pub fn accounts(&self) -> AccountRepository<'_> {
        AccountRepository::new(&self.pool)
    }

    /// Address-security and login-attempt repository.
    pub fn security(&self) -> SecurityRepository<'_> {
        SecurityRepository::new(&self.pool)
    }

    /// Room and membership repository.
    pub fn rooms(&self) -> RoomRepository<'_> {
        RoomRepository::new(&self.pool)
    }

    /// Ban, audit, and config repository.
    pub fn admin(&self) -> AdminRepository<'_> {
        AdminRepository::new(&self.pool)
    }
}

/// A throwaway file-backed database under the system temp directory. Shared
/// in-memory SQLite is process-global, which would bleed state between
/// concurrently running tests.
#[cfg(test)]
pub(crate) async fn test_db() -> Database {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let path = std::env::temp_dir().join(format!(
        "emberd-test-{}-{}.db",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    let cfg = crate::config::DatabaseConfig {
        path: path.to_string_lossy().into_owned(),
        max_open_conns: 2,
        max_idle_conns: 1,
        conn_max_lifetime_secs: 600,
    };
    Database::new(&cfg).await.expect("test database")
}
