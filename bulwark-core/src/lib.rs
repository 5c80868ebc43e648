//! Core types and services for the bulwark login defense
//!
//! This crate holds everything that does not depend on a particular storage
//! engine: the counter store contract, the three counter services built on it
//! and the [`LoginGuard`] that drives one login attempt through them.
//!
//! Storage backends implement [`RepositoryProvider`](repositories::RepositoryProvider).
//! An in-process backend lives in [`memory`]; SQL backends live in their own
//! crates.
//!
//! See [`ThrottleGate`] for the identity+origin limiter, [`FailureTally`] for
//! the consecutive-failure counter and [`LockoutClock`] for escalating account
//! lockouts.
pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
pub mod repositories;
pub mod services;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LockoutConfig, ThrottleConfig, ThrottleRule};
pub use error::{ConfigError, Error, StorageError};
pub use keys::{composite_key, identity_key};
pub use services::{
    BlockNotice, BlockReason, FailureNotice, FailureTally, LockoutClock, LoginAttempt, LoginGuard,
    LoginOutcome, ThrottleGate,
};
pub use storage::{AccountId, AttemptRecord, Counter, CounterKey, LockoutStatus, ThrottleStatus};
