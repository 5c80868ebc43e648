#![allow(dead_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use bulwark::{AccountId, AccountVerifier, LoginAttempt};
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

/// Fixed credentials keyed by exact username.
pub struct Accounts(HashMap<String, String>);

impl Accounts {
    pub fn new(accounts: &[(&str, &str)]) -> Self {
        Self(
            accounts
                .iter()
                .map(|(user, secret)| (user.to_string(), secret.to_string()))
                .collect(),
        )
    }
}

#[async_trait]
impl AccountVerifier for Accounts {
    async fn verify(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<Option<AccountId>, bulwark_core::Error> {
        Ok(self
            .0
            .get(username)
            .filter(|expected| *expected == secret)
            .map(|_| AccountId::new(&format!("id-{username}"))))
    }
}

pub fn accounts() -> Accounts {
    Accounts::new(&[("alice", "wonderland"), ("bob", "builder")])
}

/// Whole-second start time; SQLite keeps millisecond precision only.
pub fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub async fn sqlite_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

pub fn bad(user: &str, origin: &str) -> LoginAttempt {
    LoginAttempt::new(user, "wrong").with_origin(origin)
}

pub fn good(user: &str, secret: &str, origin: &str) -> LoginAttempt {
    LoginAttempt::new(user, secret).with_origin(origin)
}
