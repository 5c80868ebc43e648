use std::sync::Arc;

use crate::{
    Error,
    clock::Clock,
    repositories::CounterRepository,
    services::retry::retry_on_conflict,
    storage::{CounterKey, FAILURE_TALLY_ENDPOINT},
};

/// Consecutive-failure counter per identity.
///
/// The tally never expires on its own; only a successful login, an
/// escalation consuming it, or an administrator clears it.
pub struct FailureTally<R: CounterRepository> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
}

impl<R: CounterRepository> FailureTally<R> {
    pub fn new(repository: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Add one failure and return the new total.
    pub async fn register_failure(&self, identity: &str) -> Result<u32, Error> {
        let now = self.clock.now();
        let key = Self::key(identity);
        let counter = retry_on_conflict("tally.register_failure", || {
            self.repository.increment(&key, now)
        })
        .await?;

        tracing::debug!(identity, failures = counter.count, "Recorded login failure");
        Ok(counter.count)
    }

    pub async fn get_count(&self, identity: &str) -> Result<u32, Error> {
        let counter = self.repository.get(&Self::key(identity)).await?;
        Ok(counter.map_or(0, |c| c.count))
    }

    pub async fn reset(&self, identity: &str) -> Result<(), Error> {
        let now = self.clock.now();
        let key = Self::key(identity);
        retry_on_conflict("tally.reset", || self.repository.reset(&key, now)).await
    }

    fn key(identity: &str) -> CounterKey {
        CounterKey::new(identity, FAILURE_TALLY_ENDPOINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, memory::MemoryCounterRepository};
    use chrono::Duration;

    fn setup() -> (FailureTally<MemoryCounterRepository>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let tally = FailureTally::new(Arc::new(MemoryCounterRepository::new()), clock.clone());
        (tally, clock)
    }

    #[tokio::test]
    async fn test_unknown_identity_reads_zero() {
        let (tally, _) = setup();
        assert_eq!(tally.get_count("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failures_accumulate_without_expiry() {
        let (tally, clock) = setup();
        assert_eq!(tally.register_failure("alice").await.unwrap(), 1);
        clock.advance(Duration::days(30));
        assert_eq!(tally.register_failure("alice").await.unwrap(), 2);
        clock.advance(Duration::days(365));
        assert_eq!(tally.get_count("alice").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reset_zeroes() {
        let (tally, _) = setup();
        tally.register_failure("alice").await.unwrap();
        tally.register_failure("alice").await.unwrap();
        tally.reset("alice").await.unwrap();
        assert_eq!(tally.get_count("alice").await.unwrap(), 0);
        assert_eq!(tally.register_failure("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reset_unknown_identity_is_ok() {
        let (tally, _) = setup();
        tally.reset("nobody").await.unwrap();
        assert_eq!(tally.get_count("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let (tally, _) = setup();
        tally.register_failure("alice").await.unwrap();
        assert_eq!(tally.get_count("bob").await.unwrap(), 0);
    }
}
