use crate::{
    Error,
    repositories::{AttemptAuditRepository, CounterRepository, RepositoryProvider},
    storage::{AttemptRecord, Counter, CounterKey},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Adapter that wraps a RepositoryProvider and exposes its counter store
pub struct CounterRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> CounterRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> CounterRepository for CounterRepositoryAdapter<R> {
    async fn get(&self, key: &CounterKey) -> Result<Option<Counter>, Error> {
        self.provider.counters().get(key).await
    }

    async fn increment_or_roll(
        &self,
        key: &CounterKey,
        max_count: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, Error> {
        self.provider
            .counters()
            .increment_or_roll(key, max_count, window, now)
            .await
    }

    async fn increment(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<Counter, Error> {
        self.provider.counters().increment(key, now).await
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
        self.provider
            .counters()
            .consume_and_escalate(tally, threshold, lockout, base, cap, now)
            .await
    }

    async fn escalate(
        &self,
        key: &CounterKey,
        base: Duration,
        cap: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, Error> {
        self.provider.counters().escalate(key, base, cap, now).await
    }

    async fn reset(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<(), Error> {
        self.provider.counters().reset(key, now).await
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.counters().prune(before).await
    }
}

/// Adapter that wraps a RepositoryProvider and exposes its audit log
pub struct AuditRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> AuditRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> AttemptAuditRepository for AuditRepositoryAdapter<R> {
    async fn append(&self, record: &AttemptRecord) -> Result<(), Error> {
        self.provider.audit().append(record).await
    }
}
