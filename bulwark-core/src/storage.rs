//! Persisted records and the status views computed from them.
//!
//! One [`Counter`] row exists per [`CounterKey`]. The same row shape serves
//! three purposes, told apart by the endpoint tag:
//!
//! | Use            | Endpoint tag        | `count` means      | `window_end` means  |
//! | -------------- | ------------------- | ------------------ | ------------------- |
//! | Throttle Gate  | `login`, rule names | hits in the window | end of the window   |
//! | Failure Tally  | `login.failures`    | failures so far    | far-future sentinel |
//! | Lockout Clock  | `login.lockout`     | escalation level   | unlock instant      |
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Endpoint tag for the per identity+origin login throttle.
pub const LOGIN_ENDPOINT: &str = "login";

/// Endpoint tag for the identity-only failure tally.
pub const FAILURE_TALLY_ENDPOINT: &str = "login.failures";

/// Endpoint tag for the identity-only lockout clock.
pub const LOCKOUT_ENDPOINT: &str = "login.lockout";

/// Unix timestamp of 9999-12-31T23:59:59Z.
const UNBOUNDED_WINDOW_END_SECS: i64 = 253_402_300_799;

/// The window end stored on counters that never expire.
///
/// Chosen so every backend can represent it (Postgres `TIMESTAMPTZ` cannot
/// hold `DateTime::<Utc>::MAX_UTC`).
pub fn unbounded_window_end() -> DateTime<Utc> {
    DateTime::from_timestamp(UNBOUNDED_WINDOW_END_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Identity of a counter row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub scope: String,
    pub endpoint: String,
}

impl CounterKey {
    pub fn new(scope: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.scope, self.endpoint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub scope: String,
    pub endpoint: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub count: u32,
    pub updated_at: DateTime<Utc>,
}

impl Counter {
    /// A freshly created counter holding its first hit.
    pub fn first_hit(key: &CounterKey, now: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            scope: key.scope.clone(),
            endpoint: key.endpoint.clone(),
            window_start: now,
            window_end,
            count: 1,
            updated_at: now,
        }
    }

    pub fn key(&self) -> CounterKey {
        CounterKey::new(self.scope.clone(), self.endpoint.clone())
    }

    /// Whether the window (or lock) is still running at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.window_end > now
    }

    /// Whole seconds until the window ends, rounded up, never negative.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        ceil_seconds(self.window_end - now)
    }
}

/// Round a duration up to whole seconds, clamping negatives to zero.
pub fn ceil_seconds(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}

/// Opaque identifier returned by the account store for a verified login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: &str) -> Self {
        AccountId(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One audited request outcome. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempted_at: DateTime<Utc>,
    pub account_id: Option<AccountId>,
    pub username: Option<String>,
    pub origin: String,
    pub scope_key: String,
    pub endpoint: String,
    pub method: String,
    pub success: bool,
    pub limited: bool,
    pub message: String,
}

/// Throttle Gate view of a counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleStatus {
    pub blocked: bool,
    pub remaining_seconds: u64,
    pub fail_count: u32,
    pub block_until: Option<DateTime<Utc>>,
}

impl ThrottleStatus {
    /// The status of a key that has never been hit.
    pub fn clear() -> Self {
        Self {
            blocked: false,
            remaining_seconds: 0,
            fail_count: 0,
            block_until: None,
        }
    }
}

/// Lockout Clock view of a counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutStatus {
    pub identity: String,
    pub locked: bool,
    /// Escalation level reached so far, kept after the lock itself expires.
    pub level: u32,
    pub remaining_seconds: u64,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutStatus {
    pub fn unlocked(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            locked: false,
            level: 0,
            remaining_seconds: 0,
            locked_until: None,
        }
    }
}
