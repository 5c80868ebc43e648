//! Write-only sink for login and throttle outcomes.

use async_trait::async_trait;

use crate::{Error, storage::AttemptRecord};

/// Append-only attempt log.
///
/// The defense never reads the log back; it exists for operators and
/// downstream analysis. Records are never updated or deleted here.
#[async_trait]
pub trait AttemptAuditRepository: Send + Sync + 'static {
    async fn append(&self, record: &AttemptRecord) -> Result<(), Error>;
}

/// Emits every record as a structured `tracing` event.
///
/// Handy when attempts should land in the application log pipeline instead
/// of a table.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

#[async_trait]
impl AttemptAuditRepository for TracingAuditLog {
    async fn append(&self, record: &AttemptRecord) -> Result<(), Error> {
        tracing::info!(
            target: "bulwark::audit",
            attempted_at = %record.attempted_at,
            account_id = record.account_id.as_ref().map(|id| id.as_str()),
            username = record.username.as_deref(),
            origin = %record.origin,
            scope_key = %record.scope_key,
            endpoint = %record.endpoint,
            method = %record.method,
            success = record.success,
            limited = record.limited,
            message = %record.message,
            "login attempt"
        );
        Ok(())
    }
}
