//! # Bulwark
//!
//! Bulwark defends a login flow against brute-force and credential-stuffing
//! attacks. Each attempt passes three counters kept in one shared store:
//!
//! - a short throttle keyed by username and origin address
//! - a consecutive-failure tally keyed by username alone
//! - an escalating lockout that doubles with each repeat offense up to a cap
//!
//! Storage failures never let an attempt through. Every attempt is written to
//! an audit log.
//!
//! ## Storage Support
//!
//! - SQLite (`sqlite` feature, on by default)
//! - Postgres (`postgres` feature)
//! - Process memory, for tests and single-node deployments
//!
//! ## Example
//!
//! ```rust,no_run
//! use bulwark::{BulwarkBuilder, LoginAttempt};
//!
//! # async fn run(verifier: impl bulwark::AccountVerifier) -> Result<(), Box<dyn std::error::Error>> {
//! let bulwark = BulwarkBuilder::new()
//!     .with_sqlite("sqlite://bulwark.db?mode=rwc")
//!     .await?
//!     .with_verifier(verifier)
//!     .apply_migrations(true)
//!     .build()
//!     .await?;
//!
//! let outcome = bulwark
//!     .login(&LoginAttempt::new("alice", "hunter2").with_origin("203.0.113.7"))
//!     .await;
//! println!("{}", outcome.message());
//! # Ok(())
//! # }
//! ```
use std::{collections::HashMap, collections::HashSet, sync::Arc};

use bulwark_core::{
    ConfigError, Error, FailureTally, LockoutClock, LoginGuard, ThrottleGate,
    keys::identity_key,
    repositories::{CounterRepository, CounterRepositoryAdapter},
};
use chrono::Duration;

mod audit;
mod builder;
mod endpoint;

pub use audit::{AuditSink, AuditTarget};
pub use builder::{BulwarkBuilder, BulwarkBuilderError, NoStorage, WithStorage};
pub use endpoint::EndpointDecision;

pub use bulwark_core::{
    AccountId, AttemptRecord, BlockNotice, BlockReason, Clock, FailureNotice, LockoutConfig,
    LockoutStatus, LoginAttempt, LoginOutcome, ManualClock, SystemClock, ThrottleConfig,
    ThrottleRule, ThrottleStatus, memory::MemoryRepositoryProvider,
    repositories::UnconfiguredVerifier,
};
pub use bulwark_core::repositories::{AccountVerifier, RepositoryProvider};

#[cfg(feature = "sqlite")]
pub use bulwark_storage_sqlite::{SqliteRepositoryProvider, SqliteStorage};

#[cfg(feature = "postgres")]
pub use bulwark_storage_postgres::{PostgresRepositoryProvider, PostgresStorage};

/// Housekeeping runs hourly.
const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
pub enum BulwarkError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<Error> for BulwarkError {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(e) => BulwarkError::Config(e),
            other => BulwarkError::Storage(other.to_string()),
        }
    }
}

/// Everything a [`Bulwark`] instance is tuned by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulwarkConfig {
    pub login_throttle: ThrottleConfig,
    pub lockout: LockoutConfig,
    pub endpoint_rules: Vec<ThrottleRule>,
    /// How long a lapsed counter row is kept before housekeeping deletes it.
    pub retention: Duration,
    pub audit: AuditTarget,
}

impl Default for BulwarkConfig {
    fn default() -> Self {
        Self {
            login_throttle: ThrottleConfig::default(),
            lockout: LockoutConfig::default(),
            endpoint_rules: Vec::new(),
            retention: Duration::days(7),
            audit: AuditTarget::default(),
        }
    }
}

impl BulwarkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.login_throttle.validate()?;
        self.lockout.validate()?;
        if self.retention <= Duration::zero() {
            return Err(ConfigError::NonPositive("retention"));
        }

        let mut seen = HashSet::new();
        for rule in &self.endpoint_rules {
            rule.validate()?;
            if !seen.insert(rule.endpoint.as_str()) {
                return Err(ConfigError::DuplicateRule(rule.endpoint.clone()));
            }
        }
        Ok(())
    }
}

type Counters<R> = CounterRepositoryAdapter<R>;

pub struct Bulwark<R: RepositoryProvider> {
    repositories: Arc<R>,
    counters: Arc<Counters<R>>,
    audit: Arc<AuditSink<R>>,
    guard: LoginGuard<Counters<R>, AuditSink<R>>,
    endpoints: HashMap<String, ThrottleGate<Counters<R>>>,
    clock: Arc<dyn Clock>,
    config: BulwarkConfig,
}

impl<R: RepositoryProvider> Bulwark<R> {
    /// Wire every service to `repositories`.
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        repositories: Arc<R>,
        verifier: Arc<dyn AccountVerifier>,
        clock: Arc<dyn Clock>,
        config: BulwarkConfig,
    ) -> Result<Self, BulwarkError> {
        config.validate()?;

        let counters = Arc::new(CounterRepositoryAdapter::new(repositories.clone()));
        let audit = Arc::new(AuditSink::new(config.audit, repositories.clone()));

        let guard = LoginGuard::new(
            counters.clone(),
            audit.clone(),
            verifier,
            clock.clone(),
            config.login_throttle.clone(),
            config.lockout.clone(),
        )?;

        let mut endpoints = HashMap::with_capacity(config.endpoint_rules.len());
        for rule in &config.endpoint_rules {
            let gate = ThrottleGate::new(
                counters.clone(),
                clock.clone(),
                rule.endpoint.clone(),
                rule.limit.clone(),
            )?;
            endpoints.insert(rule.endpoint.clone(), gate);
        }

        Ok(Self {
            repositories,
            counters,
            audit,
            guard,
            endpoints,
            clock,
            config,
        })
    }

    pub fn builder() -> BulwarkBuilder<NoStorage> {
        BulwarkBuilder::new()
    }

    pub fn config(&self) -> &BulwarkConfig {
        &self.config
    }

    pub async fn migrate(&self) -> Result<(), BulwarkError> {
        self.repositories
            .migrate()
            .await
            .map_err(|e| BulwarkError::Storage(e.to_string()))
    }

    pub async fn health_check(&self) -> Result<(), BulwarkError> {
        self.repositories
            .health_check()
            .await
            .map_err(|e| BulwarkError::Storage(e.to_string()))
    }

    /// Evaluate one login attempt.
    ///
    /// This never returns an error: storage or verifier failures come back
    /// as [`LoginOutcome::Unavailable`] and the attempt is refused.
    pub async fn login(&self, attempt: &LoginAttempt) -> LoginOutcome {
        self.guard.login(attempt).await
    }

    /// Current lockout state for `username`.
    pub async fn lockout_status(&self, username: &str) -> Result<LockoutStatus, BulwarkError> {
        let identity = identity_key(Some(username));
        Ok(self.lockout().status(&identity).await?)
    }

    /// Consecutive failures recorded for `username` since its last success or
    /// escalation.
    pub async fn failure_count(&self, username: &str) -> Result<u32, BulwarkError> {
        let identity = identity_key(Some(username));
        Ok(self.tally().get_count(&identity).await?)
    }

    /// Clear the failure tally and the lockout for `username`.
    ///
    /// Meant for a password reset or an administrator. Returns whether the
    /// account was locked beforehand.
    pub async fn unlock_account(&self, username: &str) -> Result<bool, BulwarkError> {
        let identity = identity_key(Some(username));
        let was_locked = self.lockout().status(&identity).await?.locked;
        self.tally().reset(&identity).await?;
        self.lockout().reset(&identity).await?;

        tracing::info!(identity = %identity, was_locked, "Account unlocked");
        Ok(was_locked)
    }

    /// Delete counter rows whose window ended more than `older_than` ago.
    pub async fn prune(&self, older_than: Duration) -> Result<u64, BulwarkError> {
        let before = self.clock.now() - older_than;
        let count = self.counters.prune(before).await?;
        tracing::debug!(count, %before, "Pruned lapsed counters");
        Ok(count)
    }

    /// Start the background cleanup task.
    ///
    /// Every hour the task prunes counters that lapsed more than the
    /// configured retention ago. It stops once `shutdown` changes.
    pub fn start_cleanup_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let counters = Arc::clone(&self.counters);
        let clock = Arc::clone(&self.clock);
        let retention = self.config.retention;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(CLEANUP_INTERVAL);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let before = clock.now() - retention;
                        match counters.prune(before).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(count, "Pruned lapsed rate limit counters");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to prune rate limit counters");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down counter cleanup task");
                        break;
                    }
                }
            }
        })
    }

    fn tally(&self) -> &FailureTally<Counters<R>> {
        self.guard.tally()
    }

    fn lockout(&self) -> &LockoutClock<Counters<R>> {
        self.guard.lockout()
    }
}
