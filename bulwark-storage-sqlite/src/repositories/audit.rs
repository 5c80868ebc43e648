use async_trait::async_trait;
use bulwark_core::{Error, repositories::AttemptAuditRepository, storage::AttemptRecord};
use sqlx::SqlitePool;

use super::storage_error;

/// Appends attempt records to the `login_attempts` table.
pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptAuditRepository for SqliteAuditRepository {
    async fn append(&self, record: &AttemptRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts
                (attempted_at, account_id, username, origin, scope_key, endpoint, method, success, limited, message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.attempted_at.timestamp_millis())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::migrated_pool;
    use bulwark_core::storage::{AccountId, LOGIN_ENDPOINT};
    use chrono::{DateTime, Utc};

    fn record(success: bool, limited: bool) -> AttemptRecord {
        AttemptRecord {
            attempted_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            account_id: success.then(|| AccountId::new("42")),
            username: Some("alice".to_string()),
            origin: "10.0.0.1".to_string(),
            scope_key: "alice|10.0.0.1".to_string(),
            endpoint: LOGIN_ENDPOINT.to_string(),
            method: "POST".to_string(),
            success,
            limited,
            message: "Login successful.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_writes_rows() {
        let pool = migrated_pool().await;
        let repo = SqliteAuditRepository::new(pool.clone());
        repo.append(&record(false, true)).await.unwrap();
        repo.append(&record(true, false)).await.unwrap();

        let rows: Vec<(Option<String>, String, bool, bool, i64)> = sqlx::query_as(
            "SELECT account_id, scope_key, success, limited, attempted_at FROM login_attempts ORDER BY id",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, None);
        assert!(!rows[0].2);
        assert!(rows[0].3);
        assert_eq!(rows[1].0.as_deref(), Some("42"));
        assert_eq!(rows[1].1, "alice|10.0.0.1");
        assert_eq!(rows[1].4, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_append_without_schema_fails() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteAuditRepository::new(pool);
        assert!(repo.append(&record(true, false)).await.is_err());
    }
}
