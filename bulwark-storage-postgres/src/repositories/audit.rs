use async_trait::async_trait;
use bulwark_core::{Error, repositories::AttemptAuditRepository, storage::AttemptRecord};
use sqlx::PgPool;

use super::storage_error;

/// Appends attempt records to the `login_attempts` table.
pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptAuditRepository for PostgresAuditRepository {
    async fn append(&self, record: &AttemptRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts
                (attempted_at, account_id, username, origin, scope_key, endpoint, method, success, limited, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.attempted_at)
        .bind(record.account_id.as_ref().map(|id| id.as_str()))
        .bind(record.username.as_deref())
        .bind(&record.origin)
        .bind(&record.scope_key)
        .bind(&record.endpoint)
        .bind(&record.method)
        .bind(record.success)
        .bind(record.limited)
        .bind(&record.message)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(e, "Failed to append attempt record"))?;

        Ok(())
    }
}
