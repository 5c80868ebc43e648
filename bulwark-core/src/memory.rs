//! In-process storage backend.
//!
//! Counters live in a [`DashMap`]; every mutation runs inside the map's entry
//! guard for that key, which serializes concurrent writers to the same
//! `(scope, endpoint)` without a global lock. Consuming a tally spans two
//! keys and is serialized by a separate mutex. Suitable for single-process
//! deployments and tests. State is lost on restart.

use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    Error,
    error::StorageError,
    repositories::{
        AttemptAuditRepository, AuditRepositoryProvider, CounterRepository,
        CounterRepositoryProvider, RepositoryProvider, escalation_duration,
    },
    storage::{AttemptRecord, Counter, CounterKey, unbounded_window_end},
};

#[derive(Debug, Default)]
pub struct MemoryCounterRepository {
    counters: DashMap<CounterKey, Counter>,
    escalations: Mutex<()>,
}

impl MemoryCounterRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn escalate_entry(
        &self,
        key: &CounterKey,
        base: Duration,
        cap: Duration,
        now: DateTime<Utc>,
    ) -> Counter {
        match self.counters.entry(key.clone()) {
            Entry::Vacant(entry) => entry
                .insert(Counter::first_hit(
                    key,
                    now,
                    now + escalation_duration(0, base, cap),
                ))
                .clone(),
            Entry::Occupied(mut entry) => {
                let counter = entry.get_mut();
                let duration = escalation_duration(counter.count, base, cap);
                counter.count = counter.count.saturating_add(1);
                counter.window_start = now;
                counter.window_end = now + duration;
                counter.updated_at = now;
                counter.clone()
            }
        }
    }
}

#[async_trait]
impl CounterRepository for MemoryCounterRepository {
    async fn get(&self, key: &CounterKey) -> Result<Option<Counter>, Error> {
        Ok(self.counters.get(key).map(|c| c.value().clone()))
    }

    async fn increment_or_roll(
        &self,
        key: &CounterKey,
        max_count: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, Error> {
        let counter = match self.counters.entry(key.clone()) {
            Entry::Vacant(entry) => entry
                .insert(Counter::first_hit(key, now, now + window))
                .clone(),
            Entry::Occupied(mut entry) => {
                let counter = entry.get_mut();
                if counter.window_end <= now {
                    counter.window_start = now;
                    counter.window_end = now + window;
                    counter.count = 1;
                    counter.updated_at = now;
                } else if counter.count < max_count {
                    counter.count += 1;
                    counter.updated_at = now;
                    if counter.count >= max_count {
                        counter.window_start = now;
                        counter.window_end = now + window;
                    }
                }
                counter.clone()
            }
        };

        tracing::debug!(key = %key, count = counter.count, "Registered counter hit");
        Ok(counter)
    }

    async fn increment(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<Counter, Error> {
        let counter = match self.counters.entry(key.clone()) {
            Entry::Vacant(entry) => entry
                .insert(Counter::first_hit(key, now, unbounded_window_end()))
                .clone(),
            Entry::Occupied(mut entry) => {
                let counter = entry.get_mut();
                if counter.count == 0 {
                    counter.window_start = now;
                }
                counter.count = counter.count.saturating_add(1);
                counter.window_end = unbounded_window_end();
                counter.updated_at = now;
                counter.clone()
            }
        };
        Ok(counter)
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
        let _serialized = self.escalations.lock().map_err(|_| {
            tracing::error!("Escalation lock poisoned");
            StorageError::Database("Failed to escalate lockout".to_string())
        })?;

        // The tally guard must be released before touching the lockout key,
        // both may live in the same shard.
        let consumed = match self.counters.get_mut(tally) {
            Some(mut counter) if counter.count >= threshold => {
                collapse(&mut counter, now);
                true
            }
            _ => false,
        };
        if !consumed {
            return Ok(None);
        }

        Ok(Some(self.escalate_entry(lockout, base, cap, now)))
    }

    async fn escalate(
        &self,
        key: &CounterKey,
        base: Duration,
        cap: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, Error> {
        Ok(self.escalate_entry(key, base, cap, now))
    }

    async fn reset(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<(), Error> {
        if let Some(mut counter) = self.counters.get_mut(key) {
            collapse(&mut counter, now);
        }
        Ok(())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let len_before = self.counters.len();
        self.counters.retain(|_, counter| counter.window_end >= before);
        Ok(len_before.saturating_sub(self.counters.len()) as u64)
    }
}

fn collapse(counter: &mut Counter, now: DateTime<Utc>) {
    counter.count = 0;
    counter.window_start = now;
    counter.window_end = now;
    counter.updated_at = now;
}

/// Attempt log kept in memory, in append order.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<AttemptRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AttemptAuditRepository for MemoryAuditLog {
    async fn append(&self, record: &AttemptRecord) -> Result<(), Error> {
        let mut records = self.records.write().map_err(|_| {
            tracing::error!("Audit log lock poisoned");
            StorageError::Database("Failed to append attempt record".to_string())
        })?;
        records.push(record.clone());
        Ok(())
    }
}

/// Repository provider backed entirely by process memory.
#[derive(Debug, Default)]
pub struct MemoryRepositoryProvider {
    counters: MemoryCounterRepository,
    audit: MemoryAuditLog,
}

impl MemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterRepositoryProvider for MemoryRepositoryProvider {
    type CounterRepo = MemoryCounterRepository;

    fn counters(&self) -> &Self::CounterRepo {
        &self.counters
    }
}

impl AuditRepositoryProvider for MemoryRepositoryProvider {
    type AuditRepo = MemoryAuditLog;

    fn audit(&self) -> &Self::AuditRepo {
        &self.audit
    }
}

#[async_trait]
impl RepositoryProvider for MemoryRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
