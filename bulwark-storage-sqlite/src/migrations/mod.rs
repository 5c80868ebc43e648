use async_trait::async_trait;
use bulwark_migration::{
    Migration, MigrationError, MigrationManager, MigrationRecord, ensure_ordered,
};
use chrono::Utc;
use sqlx::{Database, Sqlite, SqlitePool};

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Every schema migration for this backend, in version order.
pub fn migrations() -> Vec<Box<dyn Migration<Sqlite>>> {
    vec![
        Box::new(CreateRateLimitCountersTable),
        Box::new(CreateLoginAttemptsTable),
        Box::new(CreateIndexes),
    ]
}

#[async_trait]
impl MigrationManager<Sqlite> for SqliteMigrationManager {
    async fn initialize(&self) -> Result<(), MigrationError> {
        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn up(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        ensure_ordered(migrations.iter().map(|m| m.version()))?;

        for migration in migrations {
            if self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applying migration"
            );

            migration
                .up(&mut *tx as &mut <Sqlite as Database>::Connection)
                .await?;

            sqlx::query(
                format!(
                    "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
                    self.get_migration_table_name()
                )
                .as_str(),
            )
            .bind(migration.version())
            .bind(migration.name())
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    async fn down(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        ensure_ordered(migrations.iter().map(|m| m.version()))?;

        for migration in migrations.iter().rev() {
            if !self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Rolling back migration"
            );

            migration
                .down(&mut *tx as &mut <Sqlite as Database>::Connection)
                .await?;

            sqlx::query(
                format!(
                    "DELETE FROM {} WHERE version = ?",
                    self.get_migration_table_name()
                )
                .as_str(),
            )
            .bind(migration.version())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let records = sqlx::query_as::<_, MigrationRecord>(
            format!(
                "SELECT version, name, applied_at FROM {} ORDER BY version",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn is_applied(&self, version: i64) -> Result<bool, MigrationError> {
        let result: bool = sqlx::query_scalar(
            format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE version = ?)",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }
}

/// Shared counter rows. Instants are unix milliseconds.
pub struct CreateRateLimitCountersTable;

#[async_trait]
impl Migration<Sqlite> for CreateRateLimitCountersTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateRateLimitCountersTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_counters (
                scope TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                window_end INTEGER NOT NULL,
                count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (scope, endpoint)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS rate_limit_counters")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

pub struct CreateLoginAttemptsTable;

#[async_trait]
impl Migration<Sqlite> for CreateLoginAttemptsTable {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreateLoginAttemptsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS login_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                attempted_at INTEGER NOT NULL,
                account_id TEXT,
                username TEXT,
                origin TEXT NOT NULL,
                scope_key TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                method TEXT NOT NULL,
                success BOOLEAN NOT NULL,
                limited BOOLEAN NOT NULL,
                message TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS login_attempts")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

pub struct CreateIndexes;

#[async_trait]
impl Migration<Sqlite> for CreateIndexes {
    fn version(&self) -> i64 {
        3
    }

    fn name(&self) -> &str {
        "CreateIndexes"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rate_limit_counters_window_end ON rate_limit_counters(window_end)",
        )
        .execute(&mut *conn)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_login_attempts_scope_key ON login_attempts(scope_key, attempted_at)",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query("DROP INDEX IF EXISTS idx_rate_limit_counters_window_end")
            .execute(&mut *conn)
            .await?;
        sqlx::query("DROP INDEX IF EXISTS idx_login_attempts_scope_key")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
