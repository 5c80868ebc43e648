//! SQLite implementation of the counter store.
//!
//! Every mutation is one `INSERT ... ON CONFLICT DO UPDATE ... RETURNING` or
//! one conditional `UPDATE`, so SQLite's write lock serializes concurrent
//! callers on the same row. Consuming a tally runs its conditional `UPDATE`
//! and the lockout upsert in one transaction. Instants are stored as unix
//! milliseconds.

use async_trait::async_trait;
use bulwark_core::{
    Error,
    error::StorageError,
    repositories::{CounterRepository, counter::MAX_ESCALATION_SHIFT},
    storage::{Counter, CounterKey, unbounded_window_end},
};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use super::storage_error;

const RETURNING: &str = "RETURNING scope, endpoint, window_start, window_end, count, updated_at";

// ?3 = now, ?4 = base ms, ?5 = cap ms, ?6 = largest shift
fn escalate_sql() -> String {
    format!(
        r#"
        INSERT INTO rate_limit_counters (scope, endpoint, window_start, window_end, count, updated_at)
        VALUES (?1, ?2, ?3, ?3 + MIN(?4, ?5), 1, ?3)
        ON CONFLICT (scope, endpoint) DO UPDATE SET
            window_start = ?3,
            window_end = ?3 + MIN(?4 * (1 << MIN(rate_limit_counters.count, ?6)), ?5),
            count = rate_limit_counters.count + 1,
            updated_at = ?3
        {RETURNING}
        "#
    )
}

pub struct SqliteCounterRepository {
    pool: SqlitePool,
}

impl SqliteCounterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn upsert(
        &self,
        sql: &str,
        binds: &[i64],
        key: &CounterKey,
        context: &'static str,
    ) -> Result<Counter, Error> {
        let mut query = sqlx::query_as::<_, SqliteCounter>(sql)
            .bind(&key.scope)
            .bind(&key.endpoint);
        for value in binds {
            query = query.bind(*value);
        }
        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error(e, context))?;
        row.try_into()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteCounter {
    scope: String,
    endpoint: String,
    window_start: i64,
    window_end: i64,
    count: i64,
    updated_at: i64,
}

impl TryFrom<SqliteCounter> for Counter {
    type Error = Error;

    fn try_from(row: SqliteCounter) -> Result<Self, Self::Error> {
        Ok(Counter {
            window_start: from_millis(row.window_start)?,
            window_end: from_millis(row.window_end)?,
            updated_at: from_millis(row.updated_at)?,
            count: u32::try_from(row.count).map_err(|_| {
                tracing::error!(count = row.count, scope = %row.scope, "Counter out of range");
                StorageError::Database("Invalid counter value".to_string())
            })?,
            scope: row.scope,
            endpoint: row.endpoint,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        tracing::error!(timestamp = ms, "Invalid timestamp in counter row");
        Error::Storage(StorageError::Database("Invalid timestamp".to_string()))
    })
}

#[async_trait]
impl CounterRepository for SqliteCounterRepository {
    async fn get(&self, key: &CounterKey) -> Result<Option<Counter>, Error> {
        let row = sqlx::query_as::<_, SqliteCounter>(
            r#"
            SELECT scope, endpoint, window_start, window_end, count, updated_at
            FROM rate_limit_counters
            WHERE scope = ?1 AND endpoint = ?2
            "#,
        )
        .bind(&key.scope)
        .bind(&key.endpoint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error(e, "Failed to read counter"))?;

        row.map(Counter::try_from).transpose()
    }

    async fn increment_or_roll(
        &self,
        key: &CounterKey,
        max_count: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, Error> {
        // ?3 = now, ?4 = now + window, ?5 = max_count. SET expressions see the
        // old row, so every CASE tests the same pre-update state.
        let sql = format!(
            r#"
            INSERT INTO rate_limit_counters (scope, endpoint, window_start, window_end, count, updated_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?3)
            ON CONFLICT (scope, endpoint) DO UPDATE SET
                window_start = CASE
                    WHEN rate_limit_counters.window_end <= ?3 THEN ?3
                    WHEN rate_limit_counters.count >= ?5 THEN rate_limit_counters.window_start
                    WHEN rate_limit_counters.count + 1 >= ?5 THEN ?3
                    ELSE rate_limit_counters.window_start
                END,
                window_end = CASE
                    WHEN rate_limit_counters.window_end <= ?3 THEN ?4
                    WHEN rate_limit_counters.count >= ?5 THEN rate_limit_counters.window_end
                    WHEN rate_limit_counters.count + 1 >= ?5 THEN ?4
                    ELSE rate_limit_counters.window_end
                END,
                count = CASE
                    WHEN rate_limit_counters.window_end <= ?3 THEN 1
                    WHEN rate_limit_counters.count >= ?5 THEN rate_limit_counters.count
                    ELSE rate_limit_counters.count + 1
                END,
                updated_at = CASE
                    WHEN rate_limit_counters.window_end > ?3 AND rate_limit_counters.count >= ?5
                        THEN rate_limit_counters.updated_at
                    ELSE ?3
                END
            {RETURNING}
            "#
        );

        let now_ms = now.timestamp_millis();
        let counter = self
            .upsert(
                &sql,
                &[now_ms, (now + window).timestamp_millis(), i64::from(max_count)],
                key,
                "Failed to register counter hit",
            )
            .await?;

        tracing::debug!(key = %key, count = counter.count, "Registered counter hit");
        Ok(counter)
    }

    async fn increment(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<Counter, Error> {
        let sql = format!(
            r#"
            INSERT INTO rate_limit_counters (scope, endpoint, window_start, window_end, count, updated_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?3)
            ON CONFLICT (scope, endpoint) DO UPDATE SET
                window_start = CASE
                    WHEN rate_limit_counters.count = 0 THEN ?3
                    ELSE rate_limit_counters.window_start
                END,
                window_end = ?4,
                count = rate_limit_counters.count + 1,
                updated_at = ?3
            {RETURNING}
            "#
        );

        self.upsert(
            &sql,
            &[now.timestamp_millis(), unbounded_window_end().timestamp_millis()],
            key,
            "Failed to increment counter",
        )
        .await
    }

    async fn consume_and_escalate(
        &self,
        tally: &CounterKey,
        threshold: u32,
        lockout: &CounterKey,
        base: Duration,
        cap: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Counter>, Error> {
        let now_ms = now.timestamp_millis();
        // Dropping the transaction on any error rolls both rows back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error(e, "Failed to begin escalation"))?;

        let consumed = sqlx::query(
            r#"
            UPDATE rate_limit_counters
            SET count = 0, window_start = ?3, window_end = ?3, updated_at = ?3
            WHERE scope = ?1 AND endpoint = ?2 AND count >= ?4
            "#,
        )
        .bind(&tally.scope)
        .bind(&tally.endpoint)
        .bind(now_ms)
        .bind(i64::from(threshold))
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error(e, "Failed to consume counter"))?;

        if consumed.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| storage_error(e, "Failed to end escalation"))?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, SqliteCounter>(&escalate_sql())
            .bind(&lockout.scope)
            .bind(&lockout.endpoint)
            .bind(now_ms)
            .bind(base.num_milliseconds())
            .bind(cap.num_milliseconds())
            .bind(i64::from(MAX_ESCALATION_SHIFT))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| storage_error(e, "Failed to escalate lockout"))?;
        let counter = Counter::try_from(row)?;

        tx.commit()
            .await
            .map_err(|e| storage_error(e, "Failed to commit escalation"))?;

        Ok(Some(counter))
    }

    async fn escalate(
        &self,
        key: &CounterKey,
        base: Duration,
        cap: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, Error> {
        self.upsert(
            &escalate_sql(),
            &[
                now.timestamp_millis(),
                base.num_milliseconds(),
                cap.num_milliseconds(),
                i64::from(MAX_ESCALATION_SHIFT),
            ],
            key,
            "Failed to escalate lockout",
        )
        .await
    }

    async fn reset(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE rate_limit_counters
            SET count = 0, window_start = ?3, window_end = ?3, updated_at = ?3
            WHERE scope = ?1 AND endpoint = ?2
            "#,
        )
        .bind(&key.scope)
        .bind(&key.endpoint)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(e, "Failed to reset counter"))?;

        tracing::debug!(key = %key, "Reset counter");
        Ok(())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_end < ?1")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to prune counters"))?;

        Ok(result.rows_affected())
    }
}
