//! Postgres storage backend for bulwark.
//!
//! Suited to deployments where several application processes share one
//! counter store.

pub mod migrations;
pub mod repositories;

pub use repositories::{
    PostgresAuditRepository, PostgresCounterRepository, PostgresRepositoryProvider,
};

use bulwark_core::{Error, error::StorageError};
use sqlx::{PgPool, postgres::PgPoolOptions};

#[derive(Debug)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to Postgres");
                StorageError::Connection("Failed to connect to Postgres".to_string())
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn into_repository_provider(self) -> PostgresRepositoryProvider {
        PostgresRepositoryProvider::new(self.pool)
    }
}
