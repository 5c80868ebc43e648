//! Builder pattern for constructing Bulwark instances
//!
//! This module provides a type-safe builder for creating [`Bulwark`] instances.
//! Storage has to be chosen before anything else can be configured.
//!
//! # Example
//!
//! ```rust,no_run
//! use bulwark::{BulwarkBuilder, ThrottleRule};
//! use chrono::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bulwark = BulwarkBuilder::new()
//!     .with_sqlite("sqlite::memory:")
//!     .await?
//!     .with_endpoint_rule(ThrottleRule::new("search", 15, Duration::seconds(60)))
//!     .apply_migrations(true)
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bulwark_core::{
    Clock, LockoutConfig, SystemClock, ThrottleConfig, ThrottleRule,
    memory::MemoryRepositoryProvider,
    repositories::{AccountVerifier, RepositoryProvider, UnconfiguredVerifier},
};
use chrono::Duration;

use crate::{AuditTarget, Bulwark, BulwarkConfig, BulwarkError};

#[derive(Debug, thiserror::Error)]
pub enum BulwarkBuilderError {
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<BulwarkError> for BulwarkBuilderError {
    fn from(e: BulwarkError) -> Self {
        match e {
            BulwarkError::Config(e) => BulwarkBuilderError::InvalidConfiguration(e.to_string()),
            BulwarkError::Storage(e) => BulwarkBuilderError::StorageConnection(e),
        }
    }
}

pub struct NoStorage;

pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

pub struct BulwarkBuilder<Storage> {
    storage: Storage,
    config: BulwarkConfig,
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn AccountVerifier>,
    apply_migrations: bool,
}

impl Default for BulwarkBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl BulwarkBuilder<NoStorage> {
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            config: BulwarkConfig::default(),
            clock: Arc::new(SystemClock),
            verifier: Arc::new(UnconfiguredVerifier),
            apply_migrations: false,
        }
    }

    /// Use any storage backend.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> BulwarkBuilder<WithStorage<R>> {
        BulwarkBuilder {
            storage: WithStorage { repositories },
            config: self.config,
            clock: self.clock,
            verifier: self.verifier,
            apply_migrations: self.apply_migrations,
        }
    }

    /// Keep every counter in process memory. Nothing survives a restart and
    /// nothing is shared with other processes.
    pub fn with_memory(self) -> BulwarkBuilder<WithStorage<MemoryRepositoryProvider>> {
        self.with_repositories(Arc::new(MemoryRepositoryProvider::new()))
    }
}

#[cfg(feature = "sqlite")]
impl BulwarkBuilder<NoStorage> {
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<
        BulwarkBuilder<WithStorage<bulwark_storage_sqlite::SqliteRepositoryProvider>>,
        BulwarkBuilderError,
    > {
        let storage = bulwark_storage_sqlite::SqliteStorage::connect(url)
            .await
            .map_err(|e| BulwarkBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_repositories(Arc::new(storage.into_repository_provider())))
    }

    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> BulwarkBuilder<WithStorage<bulwark_storage_sqlite::SqliteRepositoryProvider>> {
        self.with_repositories(Arc::new(
            bulwark_storage_sqlite::SqliteRepositoryProvider::new(pool),
        ))
    }
}

#[cfg(feature = "postgres")]
impl BulwarkBuilder<NoStorage> {
    pub async fn with_postgres(
        self,
        url: &str,
    ) -> Result<
        BulwarkBuilder<WithStorage<bulwark_storage_postgres::PostgresRepositoryProvider>>,
        BulwarkBuilderError,
    > {
        let storage = bulwark_storage_postgres::PostgresStorage::connect(url)
            .await
            .map_err(|e| BulwarkBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_repositories(Arc::new(storage.into_repository_provider())))
    }

    pub fn with_postgres_pool(
        self,
        pool: sqlx::PgPool,
    ) -> BulwarkBuilder<WithStorage<bulwark_storage_postgres::PostgresRepositoryProvider>> {
        self.with_repositories(Arc::new(
            bulwark_storage_postgres::PostgresRepositoryProvider::new(pool),
        ))
    }
}

impl<R: RepositoryProvider> BulwarkBuilder<WithStorage<R>> {
    pub fn with_login_throttle(mut self, config: ThrottleConfig) -> Self {
        self.config.login_throttle = config;
        self
    }

    pub fn with_lockout(mut self, config: LockoutConfig) -> Self {
        self.config.lockout = config;
        self
    }

    /// Add a throttle for another endpoint. Rules are validated by
    /// [`build`](Self::build).
    pub fn with_endpoint_rule(mut self, rule: ThrottleRule) -> Self {
        self.config.endpoint_rules.push(rule);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn with_audit_target(mut self, target: AuditTarget) -> Self {
        self.config.audit = target;
        self
    }

    /// Replace the whole configuration at once.
    pub fn with_config(mut self, config: BulwarkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the credential check. Without one every login is refused.
    pub fn with_verifier(mut self, verifier: impl AccountVerifier) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    pub async fn build(self) -> Result<Bulwark<R>, BulwarkBuilderError> {
        self.config
            .validate()
            .map_err(|e| BulwarkBuilderError::InvalidConfiguration(e.to_string()))?;

        if self.apply_migrations {
            self.storage
                .repositories
                .migrate()
                .await
                .map_err(|e| BulwarkBuilderError::Migration(e.to_string()))?;
        }

        Ok(Bulwark::new(
            self.storage.repositories,
            self.verifier,
            self.clock,
            self.config,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoginAttempt;

    #[tokio::test]
    async fn test_memory_build_uses_defaults() {
        let bulwark = BulwarkBuilder::new().with_memory().build().await.unwrap();
        assert_eq!(bulwark.config(), &BulwarkConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_lockout_fails_build() {
        let result = BulwarkBuilder::new()
            .with_memory()
            .with_lockout(LockoutConfig::new(
                5,
                Duration::seconds(120),
                Duration::seconds(60),
            ))
            .build()
            .await;
        assert!(matches!(
            result,
            Err(BulwarkBuilderError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_verifier_refuses_logins() {
        let bulwark = BulwarkBuilder::new().with_memory().build().await.unwrap();
        let outcome = bulwark.login(&LoginAttempt::new("alice", "secret")).await;
        assert!(!outcome.is_authenticated());
    }
}
