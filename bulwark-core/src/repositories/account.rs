//! Interface to the external account/credential store.

use async_trait::async_trait;

use crate::{Error, storage::AccountId};

/// Checks a username and secret against the account store.
///
/// Implementations return `Ok(None)` for any mismatch, including an unknown
/// username, so callers cannot tell the two apart. `Err` is reserved for the
/// store itself being unavailable, which the login guard treats as a
/// rejection.
#[async_trait]
pub trait AccountVerifier: Send + Sync + 'static {
    async fn verify(&self, username: &str, secret: &str) -> Result<Option<AccountId>, Error>;
}

/// Placeholder used when no verifier was configured.
///
/// Every call fails, so a misconfigured deployment rejects all logins rather
/// than accepting them.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredVerifier;

#[async_trait]
impl AccountVerifier for UnconfiguredVerifier {
    async fn verify(&self, _username: &str, _secret: &str) -> Result<Option<AccountId>, Error> {
        tracing::error!("Login attempted but no account verifier is configured");
        Err(Error::Verifier("no account verifier configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_verifier_fails_closed() {
        let result = UnconfiguredVerifier.verify("alice", "secret").await;
        assert!(matches!(result, Err(Error::Verifier(_))));
    }
}
