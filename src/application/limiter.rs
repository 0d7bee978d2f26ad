//! Tiered per-principal rate limiter.
//!
//! The limiter sits on the synchronous request path. Each principal owns a
//! [`FixedWindow`] in sharded storage; a check locks only that principal's
//! entry for the read-modify-write.

use crate::application::metrics::Metrics;
use crate::application::ports::Storage;
use crate::domain::principal::Principal;
use crate::domain::quota::{FixedWindow, QuotaDecision, QuotaPolicy, QuotaTable, RejectReason};
use crate::infrastructure::storage::ShardedStorage;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Why and for how long a request is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Rejection {
    pub reason: RejectReason,
    /// Earliest time after which a retry may succeed, when known
    #[serde(skip_serializing_if = "Option::is_none", with = "retry_after_secs")]
    pub retry_after: Option<Duration>,
}

impl Rejection {
    pub fn new(reason: RejectReason, retry_after: Option<Duration>) -> Self {
        Self {
            reason,
            retry_after,
        }
    }
}

mod retry_after_secs {
    use serde::Serializer;
    use std::time::Duration;

    // Whole seconds, rounded up so a client never retries too early.
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => {
                let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
                s.serialize_u64(secs)
            }
            None => s.serialize_none(),
        }
    }
}

/// Limiter verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Allow,
    Reject(Rejection),
}

impl LimitDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, LimitDecision::Allow)
    }
}

/// Per-principal fixed-window limiter with tier-specific quotas.
#[derive(Debug, Clone)]
pub struct TieredRateLimiter<S = Arc<ShardedStorage<String, FixedWindow>>>
where
    S: Storage<String, FixedWindow> + Clone,
{
    storage: S,
    quotas: Arc<QuotaTable>,
    metrics: Metrics,
}

impl TieredRateLimiter {
    /// Limiter over fresh in-memory storage.
    pub fn new(quotas: QuotaTable, metrics: Metrics) -> Self {
        Self::with_storage(Arc::new(ShardedStorage::new()), quotas, metrics)
    }
}

impl<S> TieredRateLimiter<S>
where
    S: Storage<String, FixedWindow> + Clone,
{
    pub fn with_storage(storage: S, quotas: QuotaTable, metrics: Metrics) -> Self {
        Self {
            storage,
            quotas: Arc::new(quotas),
            metrics,
        }
    }

    /// Decide whether `principal` may make a request at `now`.
    ///
    /// A tier without a quota policy is rejected (fails closed) and never
    /// creates limiter state.
    pub fn check(&self, principal: &Principal, now: DateTime<Utc>) -> LimitDecision {
        let Some(policy) = self.quotas.get(principal.tier) else {
            tracing::error!(
                principal = %principal.account,
                tier = %principal.tier,
                "no quota policy for tier; rejecting request"
            );
            self.metrics.record_rejected_unknown();
            return LimitDecision::Reject(Rejection::new(RejectReason::UnknownTier, None));
        };

        let decision = self.storage.upsert(
            principal.id.clone(),
            || FixedWindow::new(now),
            |window| window.register_request(policy, now),
        );

        match decision {
            QuotaDecision::Allow => {
                self.metrics.record_allowed();
                LimitDecision::Allow
            }
            QuotaDecision::Reject {
                reason,
                retry_after,
            } => {
                match reason {
                    RejectReason::MinInterval => self.metrics.record_rejected_interval(),
                    _ => self.metrics.record_rejected_quota(),
                }
                tracing::debug!(
                    principal = %principal.account,
                    reason = reason.code(),
                    retry_after_ms = retry_after.as_millis() as u64,
                    "request rejected by limiter"
                );
                LimitDecision::Reject(Rejection::new(reason, Some(retry_after)))
            }
        }
    }

    /// Drop state for principals whose window and spacing have both lapsed
    /// under every tier's policy. Returns the number still tracked.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let horizon = self.quotas.iter().map(|(_, p)| *p).reduce(|a, b| QuotaPolicy {
            max_requests: a.max_requests.max(b.max_requests),
            window: a.window.max(b.window),
            min_interval: a.min_interval.max(b.min_interval),
        });
        let dropped = match horizon {
            Some(horizon) => self.storage.evict(|_, window| window.is_idle(&horizon, now)),
            None => self.storage.evict(|_, _| true),
        };
        if dropped > 0 {
            tracing::debug!(dropped, "dropped idle limiter state");
        }
        self.storage.len()
    }

    /// Number of principals with limiter state.
    pub fn tracked_principals(&self) -> usize {
        self.storage.len()
    }

    pub fn quotas(&self) -> &QuotaTable {
        &self.quotas
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
