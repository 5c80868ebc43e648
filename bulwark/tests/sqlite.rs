#![cfg(feature = "sqlite")]

use std::sync::Arc;

use bulwark::{
    Bulwark, BlockReason, BulwarkBuilder, LoginOutcome, ManualClock, SqliteRepositoryProvider,
};
use chrono::Duration;
use sqlx::SqlitePool;

mod common;

async fn setup() -> (Bulwark<SqliteRepositoryProvider>, Arc<ManualClock>, SqlitePool) {
    let pool = common::sqlite_pool().await;
    let clock = Arc::new(ManualClock::new(common::start()));
    let bulwark = BulwarkBuilder::new()
        .with_sqlite_pool(pool.clone())
        .with_clock(clock.clone())
        .with_verifier(common::accounts())
        .apply_migrations(true)
        .build()
        .await
        .unwrap();
    (bulwark, clock, pool)
}

async fn count_attempts(pool: &SqlitePool, filter: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM login_attempts WHERE {filter}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sqlite_lockout_scenario() {
    let (bulwark, clock, pool) = setup().await;

    for n in 1..=4 {
        let outcome = bulwark.login(&common::bad("alice", "A")).await;
        let LoginOutcome::Rejected(notice) = &outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(notice.fail_count, n);
        assert_eq!(notice.remaining_attempts, 5 - n);
        assert!(notice.block.is_none());
        clock.advance(Duration::seconds(2));
    }

    let outcome = bulwark.login(&common::bad("alice", "A")).await;
    let LoginOutcome::Rejected(notice) = &outcome else {
        panic!("expected rejection, got {outcome:?}");
    };
    let block = notice.block.as_ref().unwrap();
    assert_eq!(block.reason, BlockReason::Lockout);
    assert_eq!(block.remaining_seconds, 60);
    assert_eq!(notice.remaining_attempts, 0);
    assert_eq!(bulwark.failure_count("alice").await.unwrap(), 0);

    // The correct password from a fresh origin is still refused.
    clock.advance(Duration::seconds(2));
    let outcome = bulwark
        .login(&common::good("alice", "wonderland", "C"))
        .await;
    let LoginOutcome::Locked(notice) = &outcome else {
        panic!("expected lock, got {outcome:?}");
    };
    assert_eq!(notice.remaining_seconds, 58);
    assert_eq!(
        notice.message,
        "Account \"alice\" is locked. Try again in 58s."
    );

    // bob is unaffected by alice's lock.
    bulwark.login(&common::bad("bob", "A")).await;
    bulwark.login(&common::bad("bob", "B")).await;
    let outcome = bulwark.login(&common::bad("bob", "A")).await;
    let LoginOutcome::Rejected(notice) = &outcome else {
        panic!("expected rejection, got {outcome:?}");
    };
    assert_eq!(notice.fail_count, 2);
    assert_eq!(notice.remaining_attempts, 2);
    assert_eq!(bulwark.failure_count("bob").await.unwrap(), 3);
    assert!(
        bulwark
            .login(&common::good("bob", "builder", "B"))
            .await
            .is_authenticated()
    );
    assert_eq!(bulwark.failure_count("bob").await.unwrap(), 0);

    assert_eq!(count_attempts(&pool, "1 = 1").await, 10);
    assert_eq!(count_attempts(&pool, "limited = 1").await, 2);
    assert_eq!(count_attempts(&pool, "success = 1").await, 1);
    assert_eq!(
        count_attempts(&pool, "username = 'alice' AND scope_key = 'alice|C'").await,
        1
    );
}

#[tokio::test]
async fn test_rotating_origins_still_locks_identity() {
    let (bulwark, _clock, _pool) = setup().await;

    for origin in ["A", "B", "C", "D"] {
        let outcome = bulwark.login(&common::bad("alice", origin)).await;
        assert!(matches!(outcome, LoginOutcome::Rejected(ref n) if n.block.is_none()));
    }
    let outcome = bulwark.login(&common::bad("alice", "E")).await;
    assert!(outcome.is_limited());

    let status = bulwark.lockout_status("alice").await.unwrap();
    assert!(status.locked);
    assert_eq!(status.level, 1);
    assert_eq!(status.remaining_seconds, 60);
}

#[tokio::test]
async fn test_repeat_lockouts_double() {
    let (bulwark, clock, _pool) = setup().await;
    let origins = ["A", "B", "C", "D", "E"];

    for expected in [60, 120, 240] {
        for origin in origins {
            bulwark.login(&common::bad("alice", origin)).await;
        }
        let status = bulwark.lockout_status("alice").await.unwrap();
        assert!(status.locked);
        assert_eq!(status.remaining_seconds, expected);
        clock.advance(Duration::seconds(expected as i64));
    }
}

#[tokio::test]
async fn test_unlock_clears_lockout_but_not_throttle() {
    let (bulwark, clock, _pool) = setup().await;

    for _ in 0..5 {
        bulwark.login(&common::bad("alice", "A")).await;
    }
    assert!(bulwark.lockout_status("alice").await.unwrap().locked);

    assert!(bulwark.unlock_account("alice").await.unwrap());
    assert!(!bulwark.unlock_account("alice").await.unwrap());

    let status = bulwark.lockout_status("alice").await.unwrap();
    assert!(!status.locked);
    assert_eq!(status.level, 0);

    // The identity+origin throttle on A is independent of the account lock.
    clock.advance(Duration::seconds(10));
    let outcome = bulwark
        .login(&common::good("alice", "wonderland", "A"))
        .await;
    let LoginOutcome::Throttled(notice) = &outcome else {
        panic!("expected throttle, got {outcome:?}");
    };
    assert_eq!(notice.remaining_seconds, 50);

    assert!(
        bulwark
            .login(&common::good("alice", "wonderland", "B"))
            .await
            .is_authenticated()
    );
}

#[tokio::test]
async fn test_lockout_status_serializes() {
    let (bulwark, clock, _pool) = setup().await;
    for _ in 0..5 {
        bulwark.login(&common::bad("alice", "A")).await;
    }

    let status = bulwark.lockout_status("alice").await.unwrap();
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["identity"], "alice");
    assert_eq!(json["locked"], true);
    assert_eq!(json["level"], 1);
    assert_eq!(json["remaining_seconds"], 60);

    clock.advance(Duration::seconds(60));
    let json = serde_json::to_value(bulwark.lockout_status("alice").await.unwrap()).unwrap();
    assert_eq!(json["locked"], false);
    assert!(json["locked_until"].is_null());
}
