//! Short fixed-window limiter.
//!
//! A throttle counts hits per scope key within a window. Once `max_fail` hits
//! land inside one window the key is blocked for a full window measured from
//! the hit that reached the limit. Login throttles are keyed by
//! identity+origin, so another address using the same username keeps its own
//! allowance.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    Error,
    clock::Clock,
    config::ThrottleConfig,
    repositories::CounterRepository,
    services::retry::retry_on_conflict,
    storage::{Counter, CounterKey, ThrottleStatus},
};

pub struct ThrottleGate<R: CounterRepository> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    endpoint: String,
    config: ThrottleConfig,
}

impl<R: CounterRepository> ThrottleGate<R> {
    /// Create a throttle storing its counters under `endpoint`.
    ///
    /// Fails if the configuration has a zero limit or a non-positive window.
    pub fn new(
        repository: Arc<R>,
        clock: Arc<dyn Clock>,
        endpoint: impl Into<String>,
        config: ThrottleConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            repository,
            clock,
            endpoint: endpoint.into(),
            config,
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether `key` is blocked right now.
    ///
    /// Read-only: checking never changes the counter.
    pub async fn is_blocked(&self, key: &str) -> Result<ThrottleStatus, Error> {
        let now = self.clock.now();
        let counter = self.repository.get(&self.counter_key(key)).await?;
        Ok(match counter {
            Some(counter) => self.status_of(&counter, now),
            None => ThrottleStatus::clear(),
        })
    }

    /// Count one hit and return the resulting status.
    ///
    /// Hits on a key that is already blocked are absorbed without raising
    /// the count.
    pub async fn register_hit(&self, key: &str) -> Result<ThrottleStatus, Error> {
        let now = self.clock.now();
        let counter_key = self.counter_key(key);
        let counter = retry_on_conflict("throttle.register_hit", || {
            self.repository.increment_or_roll(
                &counter_key,
                self.config.max_fail,
                self.config.window,
                now,
            )
        })
        .await?;

        let status = self.status_of(&counter, now);
        if status.blocked {
            tracing::warn!(
                key = %counter_key,
                remaining_seconds = status.remaining_seconds,
                "Throttle limit reached"
            );
        }
        Ok(status)
    }

    /// Clear the count and any active block for `key`.
    pub async fn reset(&self, key: &str) -> Result<(), Error> {
        let now = self.clock.now();
        let counter_key = self.counter_key(key);
        retry_on_conflict("throttle.reset", || {
            self.repository.reset(&counter_key, now)
        })
        .await
    }

    fn counter_key(&self, key: &str) -> CounterKey {
        CounterKey::new(key, self.endpoint.clone())
    }

    fn status_of(&self, counter: &Counter, now: DateTime<Utc>) -> ThrottleStatus {
        let blocked = counter.is_active(now) && counter.count >= self.config.max_fail;
        ThrottleStatus {
            blocked,
            remaining_seconds: if blocked {
                counter.remaining_seconds(now)
            } else {
                0
            },
            fail_count: counter.count,
            block_until: blocked.then_some(counter.window_end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, memory::MemoryCounterRepository, storage::LOGIN_ENDPOINT};
    use chrono::Duration;

    fn setup(max_fail: u32, window_secs: i64) -> (ThrottleGate<MemoryCounterRepository>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let gate = ThrottleGate::new(
            Arc::new(MemoryCounterRepository::new()),
            clock.clone(),
            LOGIN_ENDPOINT,
            ThrottleConfig::new(max_fail, Duration::seconds(window_secs)),
        )
        .unwrap();
        (gate, clock)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = ThrottleGate::new(
            Arc::new(MemoryCounterRepository::new()),
            Arc::new(ManualClock::default()),
            LOGIN_ENDPOINT,
            ThrottleConfig::new(0, Duration::seconds(60)),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unknown_key_is_clear() {
        let (gate, _) = setup(5, 60);
        let status = gate.is_blocked("alice|10.0.0.1").await.unwrap();
        assert_eq!(status, ThrottleStatus::clear());
    }

    #[tokio::test]
    async fn test_below_limit_is_not_blocked() {
        let (gate, clock) = setup(5, 60);
        for n in 1..5 {
            gate.register_hit("alice|a").await.unwrap();
            clock.advance(Duration::seconds(1));
            let status = gate.is_blocked("alice|a").await.unwrap();
            assert!(!status.blocked);
            assert_eq!(status.fail_count, n);
            assert_eq!(status.remaining_seconds, 0);
            assert!(status.block_until.is_none());
        }
    }

    #[tokio::test]
    async fn test_limit_blocks_for_full_window() {
        let (gate, clock) = setup(5, 60);
        for _ in 0..4 {
            gate.register_hit("alice|a").await.unwrap();
            clock.advance(Duration::seconds(2));
        }
        let status = gate.register_hit("alice|a").await.unwrap();
        assert!(status.blocked);
        assert_eq!(status.fail_count, 5);
        assert_eq!(status.remaining_seconds, 60);
        assert_eq!(status.block_until, Some(clock.now() + Duration::seconds(60)));

        clock.advance(Duration::seconds(30));
        let status = gate.is_blocked("alice|a").await.unwrap();
        assert!(status.blocked);
        assert_eq!(status.remaining_seconds, 30);
    }

    #[tokio::test]
    async fn test_hits_while_blocked_do_not_count() {
        let (gate, clock) = setup(3, 60);
        for _ in 0..3 {
            gate.register_hit("alice|a").await.unwrap();
        }
        let until = gate.is_blocked("alice|a").await.unwrap().block_until;

        for _ in 0..10 {
            clock.advance(Duration::seconds(1));
            let status = gate.register_hit("alice|a").await.unwrap();
            assert_eq!(status.fail_count, 3);
            assert_eq!(status.block_until, until);
        }
    }

    #[tokio::test]
    async fn test_block_expires_and_restarts_at_one() {
        let (gate, clock) = setup(2, 60);
        gate.register_hit("alice|a").await.unwrap();
        gate.register_hit("alice|a").await.unwrap();
        assert!(gate.is_blocked("alice|a").await.unwrap().blocked);

        clock.advance(Duration::seconds(60));
        let status = gate.is_blocked("alice|a").await.unwrap();
        assert!(!status.blocked);

        let status = gate.register_hit("alice|a").await.unwrap();
        assert!(!status.blocked);
        assert_eq!(status.fail_count, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_block() {
        let (gate, _) = setup(2, 60);
        gate.register_hit("alice|a").await.unwrap();
        gate.register_hit("alice|a").await.unwrap();
        assert!(gate.is_blocked("alice|a").await.unwrap().blocked);

        gate.reset("alice|a").await.unwrap();
        let status = gate.is_blocked("alice|a").await.unwrap();
        assert!(!status.blocked);
        assert_eq!(status.fail_count, 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (gate, _) = setup(2, 60);
        gate.register_hit("alice|a").await.unwrap();
        gate.register_hit("alice|a").await.unwrap();

        assert!(gate.is_blocked("alice|a").await.unwrap().blocked);
        assert!(!gate.is_blocked("alice|b").await.unwrap().blocked);
        assert!(!gate.is_blocked("bob|a").await.unwrap().blocked);
    }
}
