use async_trait::async_trait;
use bulwark_migration::{
    Migration, MigrationError, MigrationManager, MigrationRecord, ensure_ordered,
};
use chrono::Utc;
use sqlx::{Database, PgPool, Postgres};

pub struct PostgresMigrationManager {
    pool: PgPool,
}

impl PostgresMigrationManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub fn migrations() -> Vec<Box<dyn Migration<Postgres>>> {
    vec![
        Box::new(CreateRateLimitCountersTable),
        Box::new(CreateLoginAttemptsTable),
        Box::new(CreateIndexes),
    ]
}

#[async_trait]
impl MigrationManager<Postgres> for PostgresMigrationManager {
    async fn initialize(&self) -> Result<(), MigrationError> {
        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {} (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at BIGINT NOT NULL
            );"#,
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn up(&self, migrations: &[Box<dyn Migration<Postgres>>]) -> Result<(), MigrationError> {
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
                .up(&mut *tx as &mut <Postgres as Database>::Connection)
                .await?;

            sqlx::query(
                format!(
                    "INSERT INTO {} (version, name, applied_at) VALUES ($1, $2, $3)",
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

    async fn down(&self, migrations: &[Box<dyn Migration<Postgres>>]) -> Result<(), MigrationError> {
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
                .down(&mut *tx as &mut <Postgres as Database>::Connection)
                .await?;

            sqlx::query(
                format!(
                    "DELETE FROM {} WHERE version = $1",
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
                "SELECT EXISTS(SELECT 1 FROM {} WHERE version = $1)",
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

pub struct CreateRateLimitCountersTable;

#[async_trait]
impl Migration<Postgres> for CreateRateLimitCountersTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateRateLimitCountersTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Postgres as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_counters (
                scope TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                window_start TIMESTAMPTZ NOT NULL,
                window_end TIMESTAMPTZ NOT NULL,
                count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
                updated_at TIMESTAMPTZ NOT NULL,
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
        conn: &'a mut <Postgres as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS rate_limit_counters")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

pub struct CreateLoginAttemptsTable;

#[async_trait]
impl Migration<Postgres> for CreateLoginAttemptsTable {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreateLoginAttemptsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Postgres as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS login_attempts (
                id BIGSERIAL PRIMARY KEY,
                attempted_at TIMESTAMPTZ NOT NULL,
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
        conn: &'a mut <Postgres as Database>::Connection,
    ) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS login_attempts")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

pub struct CreateIndexes;

#[async_trait]
impl Migration<Postgres> for CreateIndexes {
    fn version(&self) -> i64 {
        3
    }

    fn name(&self) -> &str {
        "CreateIndexes"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Postgres as Database>::Connection,
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
        conn: &'a mut <Postgres as Database>::Connection,
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
