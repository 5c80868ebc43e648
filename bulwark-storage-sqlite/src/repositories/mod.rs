//! Repository implementations for SQLite storage

pub mod audit;
pub mod counter;

pub use audit::SqliteAuditRepository;
pub use counter::SqliteCounterRepository;

use async_trait::async_trait;
use bulwark_core::{
    Error,
    error::StorageError,
    repositories::{AuditRepositoryProvider, CounterRepositoryProvider, RepositoryProvider},
};
use bulwark_migration::MigrationManager;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::migrations::{SqliteMigrationManager, migrations};

/// Primary result codes SQLite reports when another connection holds the lock.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Repository provider implementation for SQLite
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    counters: Arc<SqliteCounterRepository>,
    audit: Arc<SqliteAuditRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let counters = Arc::new(SqliteCounterRepository::new(pool.clone()));
        let audit = Arc::new(SqliteAuditRepository::new(pool.clone()));

        Self {
            pool,
            counters,
            audit,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl CounterRepositoryProvider for SqliteRepositoryProvider {
    type CounterRepo = SqliteCounterRepository;

    fn counters(&self) -> &Self::CounterRepo {
        &self.counters
    }
}

impl AuditRepositoryProvider for SqliteRepositoryProvider {
    type AuditRepo = SqliteAuditRepository;

    fn audit(&self) -> &Self::AuditRepo {
        &self.audit
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await?;
        manager.up(&migrations()).await?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed health check"))?;
        Ok(())
    }
}

/// Log a driver error and replace it with a generic [`StorageError`].
///
/// Lock contention becomes [`StorageError::Conflict`] so the services retry it.
pub(crate) fn storage_error(e: sqlx::Error, context: &'static str) -> Error {
    if is_contention(&e) {
        tracing::debug!(error = %e, context, "SQLite lock contention");
        return Error::Storage(StorageError::Conflict(context.to_string()));
    }

    tracing::error!(error = %e, "{context}");
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            Error::Storage(StorageError::Connection(context.to_string()))
        }
        _ => Error::Storage(StorageError::Database(context.to_string())),
    }
}

fn is_contention(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = e else {
        return false;
    };
    // Extended result codes keep the primary code in the low byte.
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}
