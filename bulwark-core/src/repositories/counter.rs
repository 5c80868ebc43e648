//! Repository trait for the shared counter store.
//!
//! This is the only interface through which counters are mutated. Every
//! throttle, tally and lockout decision is derived from the rows it returns.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{
    Error,
    storage::{Counter, CounterKey},
};

/// Atomic keyed counters over `(scope, endpoint)`.
///
/// # Concurrency
///
/// Each method must be a single atomic operation on the row for `key`: a
/// conditional upsert, a single-row transaction, or a per-key lock for
/// in-process stores. Implementations must never read the row, compute the
/// new value in application code, and write it back in a separate step, since
/// concurrent logins for the same username would lose updates.
/// [`consume_and_escalate`](Self::consume_and_escalate) touches two rows and
/// needs a transaction or an equivalent lock covering both.
///
/// When a backend detects that a concurrent writer won a race it should return
/// [`StorageError::Conflict`](crate::error::StorageError::Conflict); the
/// services retry those a bounded number of times.
#[async_trait]
pub trait CounterRepository: Send + Sync + 'static {
    /// Fetch the current row for `key`, if one was ever created.
    async fn get(&self, key: &CounterKey) -> Result<Option<Counter>, Error>;

    /// Register one hit against a fixed-window limit.
    ///
    /// - Absent: create with `count = 1` and window `[now, now + window]`.
    /// - Window lapsed (`window_end <= now`): start a new window at `now`
    ///   with `count = 1`.
    /// - Window active and `count >= max_count`: return the row unchanged.
    /// - Otherwise increment. If the increment reaches `max_count` the window
    ///   restarts at `now`, so the block always lasts a full `window` from the
    ///   triggering hit.
    async fn increment_or_roll(
        &self,
        key: &CounterKey,
        max_count: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, Error>;

    /// Increment without any window, creating the row if needed.
    ///
    /// The stored window end is [`unbounded_window_end`](crate::storage::unbounded_window_end).
    async fn increment(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<Counter, Error>;

    /// Zero the tally at `tally` if it is still at least `threshold` and, as
    /// part of the same atomic step, [`escalate`](Self::escalate) the lockout
    /// row at `lockout`.
    ///
    /// Returns the escalated lockout row for the single caller whose update
    /// consumed the tally and `None` for everyone else. Either both rows change
    /// or neither does, so a failure here never drops a tally without locking.
    async fn consume_and_escalate(
        &self,
        tally: &CounterKey,
        threshold: u32,
        lockout: &CounterKey,
        base: Duration,
        cap: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Counter>, Error>;

    /// Raise the escalation level stored in `count` by one and lock until
    /// `now + min(base * 2^prior_level, cap)`.
    async fn escalate(
        &self,
        key: &CounterKey,
        base: Duration,
        cap: Duration,
        now: DateTime<Utc>,
    ) -> Result<Counter, Error>;

    /// Set `count = 0` and collapse the window to `[now, now]`.
    ///
    /// A missing row is not an error.
    async fn reset(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<(), Error>;

    /// Delete rows whose window ended before `before`.
    ///
    /// Housekeeping only; no decision depends on pruning having run.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}

/// Lockout duration for the escalation that follows `prior_level`.
///
/// Shared by every backend so they agree on the exponent clamp.
pub fn escalation_duration(prior_level: u32, base: Duration, cap: Duration) -> Duration {
    // 2^30 times any sane base already exceeds every sane cap.
    let factor = 1_i64 << prior_level.min(MAX_ESCALATION_SHIFT);
    let millis = base.num_milliseconds().saturating_mul(factor);
    Duration::milliseconds(millis.min(cap.num_milliseconds()))
}

/// Largest power of two applied to the base lockout.
pub const MAX_ESCALATION_SHIFT: u32 = 30;
