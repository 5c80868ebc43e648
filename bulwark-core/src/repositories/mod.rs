//! Repository traits for data access layer
//!
//! This module defines the repository interfaces that services use to interact with storage.
//!
//! # Trait Hierarchy
//!
//! - [`CounterRepository`] and [`AttemptAuditRepository`] define the operations for each data domain
//! - `*RepositoryProvider` traits give access to each repository type
//! - [`RepositoryProvider`] combines the provider traits plus lifecycle methods
//!
//! Storage backends implement [`RepositoryProvider`]; services receive the
//! individual repositories through the adapters in [`adapter`].

pub mod account;
pub mod adapter;
pub mod audit;
pub mod counter;

pub use account::{AccountVerifier, UnconfiguredVerifier};
pub use adapter::{AuditRepositoryAdapter, CounterRepositoryAdapter};
pub use audit::{AttemptAuditRepository, TracingAuditLog};
pub use counter::{CounterRepository, escalation_duration};

use async_trait::async_trait;

use crate::Error;

/// Provider trait for counter store access.
pub trait CounterRepositoryProvider: Send + Sync + 'static {
    /// The counter repository implementation type
    type CounterRepo: CounterRepository;

    /// Get the counter repository
    fn counters(&self) -> &Self::CounterRepo;
}

/// Provider trait for attempt audit log access.
pub trait AuditRepositoryProvider: Send + Sync + 'static {
    /// The audit repository implementation type
    type AuditRepo: AttemptAuditRepository;

    /// Get the audit repository
    fn audit(&self) -> &Self::AuditRepo;
}

/// Provider trait that storage implementations must implement to provide all repositories.
///
/// # Implementing a Custom Storage Backend
///
/// 1. Implement [`CounterRepository`] with atomic per-key updates
/// 2. Implement [`AttemptAuditRepository`]
/// 3. Implement both provider traits and this trait's lifecycle methods
///
/// ```rust,ignore
/// use bulwark_core::repositories::*;
///
/// struct MyStorage { /* ... */ }
///
/// impl CounterRepositoryProvider for MyStorage {
///     type CounterRepo = MyCounterRepository;
///     fn counters(&self) -> &Self::CounterRepo { &self.counters }
/// }
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider: CounterRepositoryProvider + AuditRepositoryProvider {
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
