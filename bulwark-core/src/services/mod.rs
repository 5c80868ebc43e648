//! Service layer for the login defense
//!
//! Each counter service owns one use of the shared counter store. The
//! [`LoginGuard`] combines them into the per-attempt flow.

pub mod lockout;
pub mod login;
pub mod retry;
pub mod tally;
pub mod throttle;

pub use lockout::LockoutClock;
pub use login::{
    BlockNotice, BlockReason, FailureNotice, LoginAttempt, LoginGuard, LoginOutcome,
    SUCCESS_MESSAGE, UNAVAILABLE_MESSAGE,
};
pub use retry::{MAX_CONFLICT_ATTEMPTS, retry_on_conflict};
pub use tally::FailureTally;
pub use throttle::ThrottleGate;
