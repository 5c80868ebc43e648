//! Policy configuration.
//!
//! Every value is passed explicitly at construction and validated once;
//! nothing here is read from global state at request time.

use chrono::Duration;

use crate::{
    error::ConfigError,
    storage::{FAILURE_TALLY_ENDPOINT, LOCKOUT_ENDPOINT, LOGIN_ENDPOINT},
};

/// Fixed-window limit for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Hits allowed in one window before the key is blocked.
    pub max_fail: u32,
    /// Window length, and the block duration once the limit is reached.
    pub window: Duration,
}

impl Default for ThrottleConfig {
    /// 5 failures per 60 seconds.
    fn default() -> Self {
        Self {
            max_fail: 5,
            window: Duration::seconds(60),
        }
    }
}

impl ThrottleConfig {
    pub fn new(max_fail: u32, window: Duration) -> Self {
        Self { max_fail, window }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_fail == 0 {
            return Err(ConfigError::NonPositive("throttle.max_fail"));
        }
        if self.window <= Duration::zero() {
            return Err(ConfigError::NonPositive("throttle.window"));
        }
        Ok(())
    }
}

/// Escalating lockout policy.
///
/// The n-th consecutive lockout lasts `min(base * 2^(n-1), cap)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutConfig {
    /// Identity-wide failures that trigger the next lockout.
    pub threshold: u32,
    /// Duration of the first lockout.
    pub base: Duration,
    /// Longest lockout ever applied.
    pub cap: Duration,
}

impl Default for LockoutConfig {
    /// 5 failures, 60 second base, 1 hour cap.
    fn default() -> Self {
        Self {
            threshold: 5,
            base: Duration::seconds(60),
            cap: Duration::seconds(3600),
        }
    }
}

impl LockoutConfig {
    pub fn new(threshold: u32, base: Duration, cap: Duration) -> Self {
        Self {
            threshold,
            base,
            cap,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::NonPositive("lockout.threshold"));
        }
        if self.base <= Duration::zero() {
            return Err(ConfigError::NonPositive("lockout.base"));
        }
        if self.cap <= Duration::zero() {
            return Err(ConfigError::NonPositive("lockout.cap"));
        }
        if self.cap < self.base {
            return Err(ConfigError::CapBelowBase {
                base: self.base.num_seconds(),
                cap: self.cap.num_seconds(),
            });
        }
        Ok(())
    }
}

/// A throttle applied to an abuse-prone endpoint other than login, such as
/// catalog search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleRule {
    /// Endpoint tag the counters are stored under.
    pub endpoint: String,
    pub limit: ThrottleConfig,
}

impl ThrottleRule {
    pub fn new(endpoint: impl Into<String>, max_hits: u32, window: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            limit: ThrottleConfig::new(max_hits, window),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty()
            || endpoint != self.endpoint
            || [LOGIN_ENDPOINT, FAILURE_TALLY_ENDPOINT, LOCKOUT_ENDPOINT].contains(&endpoint)
        {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        self.limit.validate()
    }
}
