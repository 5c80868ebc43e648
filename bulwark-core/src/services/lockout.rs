//! Escalating account lockout.
//!
//! The lockout row for an identity stores the escalation level in `count` and
//! the end of the current lock in `window_end`. Locks are evaluated lazily:
//! an identity is locked while `window_end > now`, and nothing has to run
//! when a lock expires. Each escalation lasts `min(base * 2^level, cap)`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    Error,
    clock::Clock,
    config::LockoutConfig,
    repositories::{CounterRepository, escalation_duration},
    services::retry::retry_on_conflict,
    storage::{Counter, CounterKey, FAILURE_TALLY_ENDPOINT, LOCKOUT_ENDPOINT, LockoutStatus},
};

pub struct LockoutClock<R: CounterRepository> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    config: LockoutConfig,
}

impl<R: CounterRepository> LockoutClock<R> {
    pub fn new(
        repository: Arc<R>,
        clock: Arc<dyn Clock>,
        config: LockoutConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            repository,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Length of the lock applied when escalating from `level`.
    pub fn duration_for_level(&self, level: u32) -> Duration {
        escalation_duration(level, self.config.base, self.config.cap)
    }

    pub async fn status(&self, identity: &str) -> Result<LockoutStatus, Error> {
        let now = self.clock.now();
        let counter = self.repository.get(&Self::key(identity)).await?;
        Ok(match counter {
            Some(counter) => Self::status_of(identity, &counter, now),
            None => LockoutStatus::unlocked(identity),
        })
    }

    /// Move to the next level and lock from now.
    pub async fn escalate(&self, identity: &str) -> Result<LockoutStatus, Error> {
        let now = self.clock.now();
        let key = Self::key(identity);
        let counter = retry_on_conflict("lockout.escalate", || {
            self.repository
                .escalate(&key, self.config.base, self.config.cap, now)
        })
        .await?;

        Ok(Self::locked(identity, &counter, now))
    }

    /// Spend a failure tally that has reached the threshold on the next level.
    ///
    /// The tally is zeroed and the lock applied in one repository step, so of
    /// several concurrent callers exactly one gets `Some`. By the time the
    /// others get `None` the lock is already visible through [`status`](Self::status).
    pub async fn escalate_on_tally(&self, identity: &str) -> Result<Option<LockoutStatus>, Error> {
        let now = self.clock.now();
        let tally = CounterKey::new(identity, FAILURE_TALLY_ENDPOINT);
        let key = Self::key(identity);
        let counter = retry_on_conflict("lockout.escalate_on_tally", || {
            self.repository.consume_and_escalate(
                &tally,
                self.config.threshold,
                &key,
                self.config.base,
                self.config.cap,
                now,
            )
        })
        .await?;

        Ok(counter.map(|counter| Self::locked(identity, &counter, now)))
    }

    /// Unlock and drop the escalation level back to zero.
    pub async fn reset(&self, identity: &str) -> Result<(), Error> {
        let now = self.clock.now();
        let key = Self::key(identity);
        retry_on_conflict("lockout.reset", || self.repository.reset(&key, now)).await
    }

    fn key(identity: &str) -> CounterKey {
        CounterKey::new(identity, LOCKOUT_ENDPOINT)
    }

    fn locked(identity: &str, counter: &Counter, now: DateTime<Utc>) -> LockoutStatus {
        let status = Self::status_of(identity, counter, now);
        tracing::info!(
            identity,
            level = status.level,
            remaining_seconds = status.remaining_seconds,
            "Account locked"
        );
        status
    }

    fn status_of(identity: &str, counter: &Counter, now: DateTime<Utc>) -> LockoutStatus {
        let locked = counter.is_active(now);
        LockoutStatus {
            identity: identity.to_string(),
            locked,
            level: counter.count,
            remaining_seconds: counter.remaining_seconds(now),
            locked_until: locked.then_some(counter.window_end),
        }
    }
}
