//! Throttling for abuse-prone endpoints other than login.
//!
//! Each [`ThrottleRule`](bulwark_core::ThrottleRule) gets its own
//! [`ThrottleGate`](bulwark_core::ThrottleGate) keyed by identity+origin and
//! stored under the rule's endpoint name. Blocked requests are audited with
//! `limited = true`; allowed ones are only counted.

use bulwark_core::{
    BlockNotice, Clock,
    keys::{UNKNOWN_ORIGIN, composite_key},
    repositories::{AttemptAuditRepository, RepositoryProvider},
    storage::AttemptRecord,
};
use serde::{Deserialize, Serialize};

use crate::Bulwark;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum EndpointDecision {
    /// Serve the request. `hits_remaining` may be zero, in which case the
    /// next request in this window is blocked.
    Allowed { hits_remaining: u32 },
    Blocked(BlockNotice),
    /// The counter store could not be consulted; refuse the request.
    Unavailable,
}

impl EndpointDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, EndpointDecision::Allowed { .. })
    }
}

impl<R: RepositoryProvider> Bulwark<R> {
    /// Check and count one request against the rule named `endpoint`.
    ///
    /// An endpoint without a configured rule is refused with
    /// [`EndpointDecision::Unavailable`].
    pub async fn check_endpoint(
        &self,
        endpoint: &str,
        identity: Option<&str>,
        origin: Option<&str>,
        method: &str,
    ) -> EndpointDecision {
        let Some(gate) = self.endpoints.get(endpoint) else {
            tracing::error!(endpoint, "No throttle rule configured for endpoint");
            return EndpointDecision::Unavailable;
        };

        let scope = composite_key(identity, origin);
        let status = match gate.is_blocked(&scope).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(error = %e, endpoint, "Endpoint throttle check failed, refusing");
                return EndpointDecision::Unavailable;
            }
        };

        if status.blocked {
            let notice = BlockNotice::from_throttle(&status);
            tracing::warn!(
                endpoint,
                scope = %scope,
                remaining_seconds = notice.remaining_seconds,
                "Request throttled"
            );
            let record = AttemptRecord {
                attempted_at: self.clock.now(),
                account_id: None,
                username: identity.map(str::to_string),
                origin: origin
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .unwrap_or(UNKNOWN_ORIGIN)
                    .to_string(),
                scope_key: scope.clone(),
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                success: false,
                limited: true,
                message: notice.message.clone(),
            };
            if let Err(e) = self.audit.append(&record).await {
                tracing::warn!(error = %e, endpoint, "Failed to write throttle audit record");
            }
            return EndpointDecision::Blocked(notice);
        }

        match gate.register_hit(&scope).await {
            Ok(status) => EndpointDecision::Allowed {
                hits_remaining: gate.config().max_fail.saturating_sub(status.fail_count),
            },
            Err(e) => {
                tracing::error!(error = %e, endpoint, "Failed to count endpoint hit, refusing");
                EndpointDecision::Unavailable
            }
        }
    }
}
