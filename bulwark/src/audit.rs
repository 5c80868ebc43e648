use std::sync::Arc;

use async_trait::async_trait;
use bulwark_core::{
    Error,
    repositories::{
        AttemptAuditRepository, AuditRepositoryAdapter, RepositoryProvider, TracingAuditLog,
    },
    storage::AttemptRecord,
};

/// Where attempt records are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuditTarget {
    /// The storage backend's `login_attempts` table.
    #[default]
    Storage,
    /// Structured `tracing` events only.
    Tracing,
}

pub enum AuditSink<R: RepositoryProvider> {
    Storage(AuditRepositoryAdapter<R>),
    Tracing(TracingAuditLog),
}

impl<R: RepositoryProvider> AuditSink<R> {
    pub fn new(target: AuditTarget, repositories: Arc<R>) -> Self {
        match target {
            AuditTarget::Storage => AuditSink::Storage(AuditRepositoryAdapter::new(repositories)),
            AuditTarget::Tracing => AuditSink::Tracing(TracingAuditLog),
        }
    }
}

#[async_trait]
impl<R: RepositoryProvider> AttemptAuditRepository for AuditSink<R> {
    async fn append(&self, record: &AttemptRecord) -> Result<(), Error> {
        match self {
            AuditSink::Storage(repo) => repo.append(record).await,
            AuditSink::Tracing(log) => log.append(record).await,
        }
    }
}
