//! SQLite storage backend for bulwark.
//!
//! ```rust,ignore
//! use bulwark_storage_sqlite::SqliteStorage;
//! use bulwark_core::repositories::RepositoryProvider;
//!
//! let storage = SqliteStorage::connect("sqlite://bulwark.db?mode=rwc").await?;
//! let provider = storage.into_repository_provider();
//! provider.migrate().await?;
//! ```

pub mod migrations;
pub mod repositories;

pub use repositories::{SqliteAuditRepository, SqliteCounterRepository, SqliteRepositoryProvider};

use std::{str::FromStr, time::Duration};

use bulwark_core::{Error, error::StorageError};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

/// How long a connection waits on SQLite's write lock before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url`.
    ///
    /// An in-memory database is limited to a single connection, since every
    /// connection to `:memory:` would otherwise see its own empty database.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| {
                tracing::error!(error = %e, "Invalid SQLite connection string");
                StorageError::Connection("Invalid SQLite connection string".to_string())
            })?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 10 })
            .connect_with(options)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to SQLite");
                StorageError::Connection("Failed to connect to SQLite".to_string())
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn into_repository_provider(self) -> SqliteRepositoryProvider {
        SqliteRepositoryProvider::new(self.pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{path::PathBuf, sync::Arc};

    use bulwark_core::{
        CounterKey,
        repositories::{CounterRepository, CounterRepositoryProvider, RepositoryProvider},
        services::retry_on_conflict,
        storage::{FAILURE_TALLY_ENDPOINT, LOCKOUT_ENDPOINT, LOGIN_ENDPOINT},
    };
    use chrono::{DateTime, Utc};

    /// Stored instants keep millisecond precision.
    fn now_millis() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    /// A database file removed, with its WAL companions, on drop.
    struct TempDatabase(PathBuf);

    impl TempDatabase {
        fn new(name: &str) -> Self {
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            Self(std::env::temp_dir().join(format!(
                "bulwark-{name}-{}-{nanos}.db",
                std::process::id()
            )))
        }

        fn url(&self) -> String {
            format!("sqlite://{}", self.0.display())
        }

        async fn provider(&self) -> Arc<SqliteRepositoryProvider> {
            let storage = SqliteStorage::connect(&self.url()).await.unwrap();
            let provider = storage.into_repository_provider();
            provider.migrate().await.unwrap();
            Arc::new(provider)
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let mut path = self.0.clone().into_os_string();
                path.push(suffix);
                let _ = std::fs::remove_file(path);
            }
        }
    }

    #[tokio::test]
    async fn test_connect_in_memory_and_migrate() {
        let storage = SqliteStorage::connect("sqlite::memory:").await.unwrap();
        let provider = storage.into_repository_provider();
        provider.migrate().await.unwrap();
        provider.health_check().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pooled_increments_do_not_lose_updates() {
        let db = TempDatabase::new("increments");
        let provider = db.provider().await;
        assert_eq!(provider.pool().options().get_max_connections(), 10);
        let key = CounterKey::new("alice", FAILURE_TALLY_ENDPOINT);
        let now = now_millis();

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let provider = provider.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    retry_on_conflict("increment", || provider.counters().increment(&key, now))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let counter = provider.counters().get(&key).await.unwrap().unwrap();
        assert_eq!(counter.count, 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pooled_hits_freeze_at_max() {
        let db = TempDatabase::new("hits");
        let provider = db.provider().await;
        let key = CounterKey::new("alice|a", LOGIN_ENDPOINT);
        let window = chrono::Duration::seconds(60);
        let now = now_millis();

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let provider = provider.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    retry_on_conflict("increment_or_roll", || {
                        provider.counters().increment_or_roll(&key, 5, window, now)
                    })
                    .await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().count <= 5);
        }

        let counter = provider.counters().get(&key).await.unwrap().unwrap();
        assert_eq!(counter.count, 5);
        assert_eq!(counter.window_end, now + window);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pooled_consumers_escalate_once() {
        let db = TempDatabase::new("consume");
        let provider = db.provider().await;
        let tally = CounterKey::new("alice", FAILURE_TALLY_ENDPOINT);
        let lockout = CounterKey::new("alice", LOCKOUT_ENDPOINT);
        let (base, cap) = (chrono::Duration::seconds(60), chrono::Duration::seconds(600));
        let now = now_millis();
        for _ in 0..5 {
            provider.counters().increment(&tally, now).await.unwrap();
        }

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let provider = provider.clone();
                let (tally, lockout) = (tally.clone(), lockout.clone());
                tokio::spawn(async move {
                    retry_on_conflict("consume_and_escalate", || {
                        provider
                            .counters()
                            .consume_and_escalate(&tally, 5, &lockout, base, cap, now)
                    })
                    .await
                })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        let counters = provider.counters();
        assert_eq!(counters.get(&tally).await.unwrap().unwrap().count, 0);
        let lock = counters.get(&lockout).await.unwrap().unwrap();
        assert_eq!(lock.count, 1);
        assert_eq!(lock.window_end, now + base);
    }
}
