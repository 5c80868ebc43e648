//! Versioned schema migrations shared by the SQL storage backends.
//!
//! A backend lists its [`Migration`]s in version order and hands them to its
//! [`MigrationManager`], which records every applied version in a tracking
//! table and skips versions that are already there.

use async_trait::async_trait;
use bulwark_core::error::StorageError;
use sqlx::Database;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Migration versions must be unique and ascending, got {0} after {1}")]
    OutOfOrder(i64, i64),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl From<MigrationError> for bulwark_core::Error {
    fn from(e: MigrationError) -> Self {
        tracing::error!(error = %e, "Schema migration failed");
        bulwark_core::Error::Storage(StorageError::Migration(
            "Failed to migrate database".to_string(),
        ))
    }
}

#[async_trait]
pub trait Migration<DB: Database>: Send + Sync {
    /// Execute the migration
    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Rollback the migration
    async fn down<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Unique version number for ordering migrations
    fn version(&self) -> i64;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    /// Unix seconds.
    pub applied_at: i64,
}

#[async_trait]
pub trait MigrationManager<DB: Database>: Send + Sync {
    fn get_migration_table_name(&self) -> &str {
        "_bulwark_migrations"
    }

    /// Create the tracking table if it does not exist
    async fn initialize(&self) -> Result<()>;

    /// Apply every migration not yet recorded, in order
    async fn up(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    /// Roll back recorded migrations, newest first
    async fn down(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>>;

    async fn is_applied(&self, version: i64) -> Result<bool>;
}

/// Check that versions strictly increase.
///
/// Managers call this before touching the database so a mis-ordered list
/// never half-applies.
pub fn ensure_ordered(versions: impl IntoIterator<Item = i64>) -> Result<()> {
    let mut previous: Option<i64> = None;
    for version in versions {
        if let Some(prev) = previous {
            if version <= prev {
                return Err(MigrationError::OutOfOrder(version, prev));
            }
        }
        previous = Some(version);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_ordered_accepts_ascending() {
        assert!(ensure_ordered([1, 2, 5]).is_ok());
        assert!(ensure_ordered([]).is_ok());
    }

    #[test]
    fn test_ensure_ordered_rejects_duplicates_and_descending() {
        assert!(matches!(
            ensure_ordered([1, 1]),
            Err(MigrationError::OutOfOrder(1, 1))
        ));
        assert!(matches!(
            ensure_ordered([2, 1]),
            Err(MigrationError::OutOfOrder(1, 2))
        ));
    }

    #[test]
    fn test_migration_error_maps_to_generic_storage_error() {
        let err: bulwark_core::Error = MigrationError::Migration("boom".to_string()).into();
        assert!(matches!(
            err,
            bulwark_core::Error::Storage(StorageError::Migration(ref msg)) if msg == "Failed to migrate database"
        ));
    }
}
