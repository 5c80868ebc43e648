//! Login orchestration.
//!
//! [`LoginGuard`] runs one authentication attempt through the lockout check,
//! the throttle check and credential verification, then updates the counters
//! and writes an audit record. Storage and verifier errors never let an
//! attempt through: they produce [`LoginOutcome::Unavailable`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    clock::Clock,
    config::{LockoutConfig, ThrottleConfig},
    keys::{UNKNOWN_ORIGIN, composite_key, identity_key},
    repositories::{AccountVerifier, AttemptAuditRepository, CounterRepository},
    services::{FailureTally, LockoutClock, ThrottleGate},
    storage::{AccountId, AttemptRecord, LOGIN_ENDPOINT, LockoutStatus, ThrottleStatus},
};

pub const SUCCESS_MESSAGE: &str = "Login successful.";
pub const UNAVAILABLE_MESSAGE: &str = "Login is temporarily unavailable. Please try again later.";

/// One credential submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub username: Option<String>,
    pub secret: String,
    /// Remote address as reported by the transport, if known.
    pub origin: Option<String>,
    pub method: String,
}

impl LoginAttempt {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            secret: secret.into(),
            origin: None,
            method: "POST".to_string(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    fn origin_or_unknown(&self) -> String {
        self.origin
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(UNKNOWN_ORIGIN)
            .to_string()
    }

    fn display_name(&self) -> &str {
        self.username.as_deref().map(str::trim).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Identity-wide lockout, applies from every origin.
    Lockout,
    /// Identity+origin throttle.
    Throttle,
}

/// Why and for how long an attempt is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNotice {
    pub reason: BlockReason,
    pub remaining_seconds: u64,
    pub block_until: Option<DateTime<Utc>>,
    /// Throttle hits recorded for this identity+origin.
    pub fail_count: u32,
    pub message: String,
}

impl BlockNotice {
    pub fn from_lockout(username: &str, lockout: &LockoutStatus, fail_count: u32) -> Self {
        Self {
            reason: BlockReason::Lockout,
            remaining_seconds: lockout.remaining_seconds,
            block_until: lockout.locked_until,
            fail_count,
            message: format!(
                "Account \"{username}\" is locked. Try again in {}s.",
                lockout.remaining_seconds
            ),
        }
    }

    pub fn from_throttle(throttle: &ThrottleStatus) -> Self {
        Self {
            reason: BlockReason::Throttle,
            remaining_seconds: throttle.remaining_seconds,
            block_until: throttle.block_until,
            fail_count: throttle.fail_count,
            message: format!(
                "Too many failed attempts. Try again in {}s.",
                throttle.remaining_seconds
            ),
        }
    }
}

/// Result of a failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub fail_count: u32,
    /// Failures left before either the throttle or the lockout engages.
    pub remaining_attempts: u32,
    /// Set when this failure tripped a block.
    pub block: Option<BlockNotice>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoginOutcome {
    /// Credentials verified; the caller establishes the session.
    Authenticated { account_id: AccountId },
    Rejected(FailureNotice),
    Locked(BlockNotice),
    Throttled(BlockNotice),
    /// The attempt could not be evaluated and was refused.
    Unavailable { message: String },
}

impl LoginOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, LoginOutcome::Authenticated { .. })
    }

    /// Whether a block refused the attempt or was triggered by it.
    pub fn is_limited(&self) -> bool {
        match self {
            LoginOutcome::Locked(_) | LoginOutcome::Throttled(_) => true,
            LoginOutcome::Rejected(notice) => notice.block.is_some(),
            LoginOutcome::Authenticated { .. } | LoginOutcome::Unavailable { .. } => false,
        }
    }

    /// Text suitable for showing to the person logging in.
    pub fn message(&self) -> &str {
        match self {
            LoginOutcome::Authenticated { .. } => SUCCESS_MESSAGE,
            LoginOutcome::Rejected(notice) => &notice.message,
            LoginOutcome::Locked(notice) | LoginOutcome::Throttled(notice) => &notice.message,
            LoginOutcome::Unavailable { message } => message,
        }
    }

    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            LoginOutcome::Authenticated { account_id } => Some(account_id),
            _ => None,
        }
    }
}

pub struct LoginGuard<C: CounterRepository, A: AttemptAuditRepository> {
    throttle: ThrottleGate<C>,
    tally: FailureTally<C>,
    lockout: LockoutClock<C>,
    audit: Arc<A>,
    verifier: Arc<dyn AccountVerifier>,
    clock: Arc<dyn Clock>,
}

impl<C: CounterRepository, A: AttemptAuditRepository> LoginGuard<C, A> {
    /// Wire the three counters to one store.
    ///
    /// Fails if either configuration is invalid.
    pub fn new(
        counters: Arc<C>,
        audit: Arc<A>,
        verifier: Arc<dyn AccountVerifier>,
        clock: Arc<dyn Clock>,
        throttle: ThrottleConfig,
        lockout: LockoutConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            throttle: ThrottleGate::new(counters.clone(), clock.clone(), LOGIN_ENDPOINT, throttle)?,
            tally: FailureTally::new(counters.clone(), clock.clone()),
            lockout: LockoutClock::new(counters, clock.clone(), lockout)?,
            audit,
            verifier,
            clock,
        })
    }

    pub fn throttle(&self) -> &ThrottleGate<C> {
        &self.throttle
    }

    pub fn tally(&self) -> &FailureTally<C> {
        &self.tally
    }

    pub fn lockout(&self) -> &LockoutClock<C> {
        &self.lockout
    }

    /// Evaluate one attempt and audit its outcome.
    pub async fn login(&self, attempt: &LoginAttempt) -> LoginOutcome {
        let identity = identity_key(attempt.username.as_deref());
        let scope = composite_key(attempt.username.as_deref(), attempt.origin.as_deref());

        let outcome = match self.evaluate(attempt, &identity, &scope).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    identity = %identity,
                    "Login attempt could not be evaluated, refusing"
                );
                LoginOutcome::Unavailable {
                    message: UNAVAILABLE_MESSAGE.to_string(),
                }
            }
        };

        self.record(attempt, &scope, &outcome).await;
        outcome
    }

    async fn evaluate(
        &self,
        attempt: &LoginAttempt,
        identity: &str,
        scope: &str,
    ) -> Result<LoginOutcome, Error> {
        let lockout = self.lockout.status(identity).await?;
        if lockout.locked {
            let throttle = self.throttle.is_blocked(scope).await?;
            tracing::warn!(
                identity,
                remaining_seconds = lockout.remaining_seconds,
                "Login refused, account locked"
            );
            return Ok(LoginOutcome::Locked(BlockNotice::from_lockout(
                attempt.display_name(),
                &lockout,
                throttle.fail_count,
            )));
        }

        let throttle = self.throttle.is_blocked(scope).await?;
        if throttle.blocked {
            tracing::warn!(
                scope,
                remaining_seconds = throttle.remaining_seconds,
                "Login refused, throttled"
            );
            return Ok(LoginOutcome::Throttled(BlockNotice::from_throttle(&throttle)));
        }

        let username = attempt.username.as_deref().unwrap_or_default();
        match self.verifier.verify(username, &attempt.secret).await? {
            Some(account_id) => {
                self.throttle.reset(scope).await?;
                self.tally.reset(identity).await?;
                self.lockout.reset(identity).await?;
                tracing::debug!(identity, account_id = %account_id, "Login succeeded");
                Ok(LoginOutcome::Authenticated { account_id })
            }
            None => self.reject(attempt, identity, scope).await,
        }
    }

    async fn reject(
        &self,
        attempt: &LoginAttempt,
        identity: &str,
        scope: &str,
    ) -> Result<LoginOutcome, Error> {
        let throttle = self.throttle.register_hit(scope).await?;
        let failures = self.tally.register_failure(identity).await?;
        let threshold = self.lockout.config().threshold;

        let mut lockout = None;
        if failures >= threshold {
            lockout = match self.lockout.escalate_on_tally(identity).await? {
                Some(status) => Some(status),
                None => {
                    // A concurrent failure spent the tally and its lock is already stored.
                    let status = self.lockout.status(identity).await?;
                    status.locked.then_some(status)
                }
            };
        }

        let block = match (&lockout, throttle.blocked) {
            (Some(lockout), _) => Some(BlockNotice::from_lockout(
                attempt.display_name(),
                lockout,
                throttle.fail_count,
            )),
            (None, true) => Some(BlockNotice::from_throttle(&throttle)),
            (None, false) => None,
        };

        let remaining_attempts = match block {
            Some(_) => 0,
            None => self
                .throttle
                .config()
                .max_fail
                .saturating_sub(throttle.fail_count)
                .min(threshold.saturating_sub(failures)),
        };

        let message = match &block {
            Some(block) => block.message.clone(),
            None => format!(
                "Invalid username or password. {remaining_attempts} attempt(s) remaining."
            ),
        };

        tracing::debug!(
            identity,
            scope,
            fail_count = throttle.fail_count,
            failures,
            remaining_attempts,
            "Login failed"
        );

        Ok(LoginOutcome::Rejected(FailureNotice {
            fail_count: throttle.fail_count,
            remaining_attempts,
            block,
            message,
        }))
    }

    async fn record(&self, attempt: &LoginAttempt, scope: &str, outcome: &LoginOutcome) {
        let record = AttemptRecord {
            attempted_at: self.clock.now(),
            account_id: outcome.account_id().cloned(),
            username: attempt.username.clone(),
            origin: attempt.origin_or_unknown(),
            scope_key: scope.to_string(),
            endpoint: LOGIN_ENDPOINT.to_string(),
            method: attempt.method.clone(),
            success: outcome.is_authenticated(),
            limited: outcome.is_limited(),
            message: outcome.message().to_string(),
        };

        if let Err(e) = self.audit.append(&record).await {
            tracing::warn!(error = %e, scope, "Failed to write login audit record");
        }
    }
}
