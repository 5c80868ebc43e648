//! Postgres implementation of the counter store.
//!
//! Each mutation is a single `INSERT ... ON CONFLICT DO UPDATE ... RETURNING`
//! or conditional `UPDATE`; the row lock Postgres takes for the upsert
//! serializes concurrent callers on one key. Consuming a tally and escalating
//! the lockout share one transaction.

use async_trait::async_trait;
use bulwark_core::{
    Error,
    error::StorageError,
    repositories::{CounterRepository, counter::MAX_ESCALATION_SHIFT},
    storage::{Counter, CounterKey, unbounded_window_end},
};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use super::storage_error;

pub struct PostgresCounterRepository {
    pool: PgPool,
}

impl PostgresCounterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PostgresCounter {
    scope: String,
    endpoint: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    count: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PostgresCounter> for Counter {
    type Error = Error;

    fn try_from(row: PostgresCounter) -> Result<Self, Self::Error> {
        let count = u32::try_from(row.count).map_err(|_| {
            tracing::error!(count = row.count, scope = %row.scope, "Counter out of range");
            StorageError::Database("Invalid counter value".to_string())
        })?;
        Ok(Counter {
            scope: row.scope,
            endpoint: row.endpoint,
            window_start: row.window_start,
            window_end: row.window_end,
            count,
            updated_at: row.updated_at,
        })
    }
}

// $3 = now, $4 = base ms, $5 = cap ms, $6 = largest shift
const ESCALATE: &str = r#"
    INSERT INTO rate_limit_counters (scope, endpoint, window_start, window_end, count, updated_at)
    VALUES ($1, $2, $3, $3 + make_interval(secs => LEAST($4::bigint, $5::bigint) / 1000.0), 1, $3)
    ON CONFLICT (scope, endpoint) DO UPDATE SET
        window_start = $3,
        window_end = $3 + make_interval(secs => LEAST(
            $4::bigint * (1::bigint << LEAST(rate_limit_counters.count, $6::int)),
            $5::bigint
        ) / 1000.0),
        count = rate_limit_counters.count + 1,
        updated_at = $3
    RETURNING scope, endpoint, window_start, window_end, count, updated_at
"#;

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl CounterRepository for PostgresCounterRepository {
    async fn get(&self, key: &CounterKey) -> Result<Option<Counter>, Error> {
        let row = sqlx::query_as::<_, PostgresCounter>(
            r#"
            SELECT scope, endpoint, window_start, window_end, count, updated_at
            FROM rate_limit_counters
            WHERE scope = $1 AND endpoint = $2
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
        let row = sqlx::query_as::<_, PostgresCounter>(
            r#"
            INSERT INTO rate_limit_counters (scope, endpoint, window_start, window_end, count, updated_at)
            VALUES ($1, $2, $3, $4, 1, $3)
            ON CONFLICT (scope, endpoint) DO UPDATE SET
                window_start = CASE
                    WHEN rate_limit_counters.window_end <= $3 THEN $3
                    WHEN rate_limit_counters.count >= $5 THEN rate_limit_counters.window_start
                    WHEN rate_limit_counters.count + 1 >= $5 THEN $3
                    ELSE rate_limit_counters.window_start
                END,
                window_end = CASE
                    WHEN rate_limit_counters.window_end <= $3 THEN $4
                    WHEN rate_limit_counters.count >= $5 THEN rate_limit_counters.window_end
                    WHEN rate_limit_counters.count + 1 >= $5 THEN $4
                    ELSE rate_limit_counters.window_end
                END,
                count = CASE
                    WHEN rate_limit_counters.window_end <= $3 THEN 1
                    WHEN rate_limit_counters.count >= $5 THEN rate_limit_counters.count
                    ELSE rate_limit_counters.count + 1
                END,
                updated_at = CASE
                    WHEN rate_limit_counters.window_end > $3 AND rate_limit_counters.count >= $5
                        THEN rate_limit_counters.updated_at
                    ELSE $3
                END
            RETURNING scope, endpoint, window_start, window_end, count, updated_at
            "#,
        )
        .bind(&key.scope)
        .bind(&key.endpoint)
        .bind(now)
        .bind(now + window)
        .bind(to_i32(max_count))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error(e, "Failed to register counter hit"))?;

        let counter = Counter::try_from(row)?;
        tracing::debug!(key = %key, count = counter.count, "Registered counter hit");
        Ok(counter)
    }

    async fn increment(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<Counter, Error> {
        let row = sqlx::query_as::<_, PostgresCounter>(
            r#"
            INSERT INTO rate_limit_counters (scope, endpoint, window_start, window_end, count, updated_at)
            VALUES ($1, $2, $3, $4, 1, $3)
            ON CONFLICT (scope, endpoint) DO UPDATE SET
                window_start = CASE
                    WHEN rate_limit_counters.count = 0 THEN $3
                    ELSE rate_limit_counters.window_start
                END,
                window_end = $4,
                count = rate_limit_counters.count + 1,
                updated_at = $3
            RETURNING scope, endpoint, window_start, window_end, count, updated_at
            "#,
        )
        .bind(&key.scope)
        .bind(&key.endpoint)
        .bind(now)
        .bind(unbounded_window_end())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error(e, "Failed to increment counter"))?;

        row.try_into()
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
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error(e, "Failed to begin escalation"))?;

        // A racing consumer blocks on the row lock, then re-checks the
        // condition against the zeroed row and updates nothing.
        let consumed = sqlx::query(
            r#"
            UPDATE rate_limit_counters
            SET count = 0, window_start = $3, window_end = $3, updated_at = $3
            WHERE scope = $1 AND endpoint = $2 AND count >= $4
            "#,
        )
        .bind(&tally.scope)
        .bind(&tally.endpoint)
        .bind(now)
        .bind(to_i32(threshold))
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error(e, "Failed to consume counter"))?;

        if consumed.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| storage_error(e, "Failed to end escalation"))?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, PostgresCounter>(ESCALATE)
            .bind(&lockout.scope)
            .bind(&lockout.endpoint)
            .bind(now)
            .bind(base.num_milliseconds())
            .bind(cap.num_milliseconds())
            .bind(to_i32(MAX_ESCALATION_SHIFT))
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
        let row = sqlx::query_as::<_, PostgresCounter>(ESCALATE)
            .bind(&key.scope)
            .bind(&key.endpoint)
            .bind(now)
            .bind(base.num_milliseconds())
            .bind(cap.num_milliseconds())
            .bind(to_i32(MAX_ESCALATION_SHIFT))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to escalate lockout"))?;

        row.try_into()
    }

    async fn reset(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE rate_limit_counters
            SET count = 0, window_start = $3, window_end = $3, updated_at = $3
            WHERE scope = $1 AND endpoint = $2
            "#,
        )
        .bind(&key.scope)
        .bind(&key.endpoint)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(e, "Failed to reset counter"))?;

        tracing::debug!(key = %key, "Reset counter");
        Ok(())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_end < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error(e, "Failed to prune counters"))?;

        Ok(result.rows_affected())
    }
}
