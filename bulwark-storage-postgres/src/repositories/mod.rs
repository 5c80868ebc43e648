//! Repository implementations for Postgres storage

pub mod audit;
pub mod counter;

pub use audit::PostgresAuditRepository;
pub use counter::PostgresCounterRepository;

use async_trait::async_trait;
use bulwark_core::{
    Error,
    error::StorageError,
    repositories::{AuditRepositoryProvider, CounterRepositoryProvider, RepositoryProvider},
};
use bulwark_migration::MigrationManager;
use sqlx::PgPool;
use std::sync::Arc;

use crate::migrations::{PostgresMigrationManager, migrations};

/// SQLSTATEs for a transaction that lost a race and may be repeated.
const RETRYABLE_SQLSTATES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "23505", // unique_violation
];

pub struct PostgresRepositoryProvider {
    pool: PgPool,
    counters: Arc<PostgresCounterRepository>,
    audit: Arc<PostgresAuditRepository>,
}

impl PostgresRepositoryProvider {
    pub fn new(pool: PgPool) -> Self {
        let counters = Arc::new(PostgresCounterRepository::new(pool.clone()));
        let audit = Arc::new(PostgresAuditRepository::new(pool.clone()));

        Self {
            pool,
            counters,
            audit,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CounterRepositoryProvider for PostgresRepositoryProvider {
    type CounterRepo = PostgresCounterRepository;

    fn counters(&self) -> &Self::CounterRepo {
        &self.counters
    }
}

impl AuditRepositoryProvider for PostgresRepositoryProvider {
    type AuditRepo = PostgresAuditRepository;

    fn audit(&self) -> &Self::AuditRepo {
        &self.audit
    }
}

#[async_trait]
impl RepositoryProvider for PostgresRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = PostgresMigrationManager::new(self.pool.clone());
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

pub(crate) fn storage_error(e: sqlx::Error, context: &'static str) -> Error {
    if is_retryable(&e) {
        tracing::debug!(error = %e, context, "Postgres transaction conflict");
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

fn is_retryable(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.iter().any(|s| &*code == *s)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_connection_errors() {
        let err = storage_error(sqlx::Error::PoolTimedOut, "Failed to read counter");
        assert!(matches!(err, Error::Storage(StorageError::Connection(_))));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_other_errors_stay_generic() {
        let err = storage_error(sqlx::Error::RowNotFound, "Failed to read counter");
        assert!(matches!(
            err,
            Error::Storage(StorageError::Database(ref msg)) if msg == "Failed to read counter"
        ));
    }
}
