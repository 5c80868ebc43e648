use std::future::Future;

use crate::Error;

/// Attempts made for one counter operation before a conflict is surfaced.
pub const MAX_CONFLICT_ATTEMPTS: usize = 3;

/// Run a counter-store operation, repeating it when it lost a race.
///
/// Only [`StorageError::Conflict`](crate::error::StorageError::Conflict) is
/// retried. Between tries the task yields to the scheduler; nothing sleeps.
pub async fn retry_on_conflict<T, F, Fut>(operation: &'static str, mut f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_ATTEMPTS => {
                tracing::debug!(
                    operation,
                    attempt,
                    error = %e,
                    "Counter update conflicted, retrying"
                );
                attempt += 1;
                tokio::task::yield_now().await;
            }
            result => return result,
        }
    }
}
