//! Request-path facade for the API layer.
//!
//! [`AbuseGuard::admit`] resolves the caller, checks active sanctions, then
//! consults the limiter. Sanctions come from a [`SanctionLookup`]: the
//! engine itself when the sweep runs in-process, or a
//! [`StoredSanctions`](crate::infrastructure::sanction_store::StoredSanctions)
//! view of the sanctions file when a separate daemon owns the engine.
//!
//! An admitted request must be completed with [`AbuseGuard::record`] once
//! the API knows how it went; rejected requests are logged as
//! `RATE_LIMITED` by the guard itself.

use crate::application::limiter::{LimitDecision, Rejection, TieredRateLimiter};
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, DirectoryError, EventSink, PrincipalDirectory, SanctionLookup};
use crate::domain::event::{Outcome, RequestEvent};
use crate::domain::principal::Principal;
use crate::domain::quota::{QuotaTable, RejectReason};
use crate::infrastructure::clock::SystemClock;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;

/// Error returned when building an [`AbuseGuard`] fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// No principal directory was supplied
    MissingDirectory,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::MissingDirectory => write!(f, "a principal directory is required"),
        }
    }
}

impl std::error::Error for BuildError {}

/// An incoming API call as the guard sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub token: String,
    pub source: IpAddr,
    pub endpoint: String,
    /// Opaque request parameters, copied into the event log
    pub params: String,
}

impl ApiRequest {
    pub fn new(token: impl Into<String>, source: IpAddr, endpoint: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source,
            endpoint: endpoint.into(),
            params: String::new(),
        }
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }
}

/// A request that passed every check and still has to be recorded.
#[derive(Debug)]
#[must_use = "complete the request with AbuseGuard::record"]
pub struct Admitted {
    principal: Principal,
    request: ApiRequest,
    at: DateTime<Utc>,
}

impl Admitted {
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn admitted_at(&self) -> DateTime<Utc> {
        self.at
    }
}

#[derive(Debug)]
pub enum Admission {
    Allowed(Admitted),
    Rejected(Rejection),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Admission::Rejected(r) => Some(r),
            Admission::Allowed(_) => None,
        }
    }
}

/// Builder for [`AbuseGuard`].
pub struct AbuseGuardBuilder {
    quotas: QuotaTable,
    directory: Option<Arc<dyn PrincipalDirectory>>,
    sink: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    sanctions: Option<Arc<dyn SanctionLookup>>,
    metrics: Option<Metrics>,
}

impl AbuseGuardBuilder {
    pub fn with_quotas(mut self, quotas: QuotaTable) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn PrincipalDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Where admitted and rejected requests are logged.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Reject callers this lookup reports as sanctioned, before the limiter.
    ///
    /// Pass the [`EnforcementEngine`](crate::application::engine::EnforcementEngine)
    /// when it runs in the same process.
    pub fn with_sanctions(mut self, sanctions: Arc<dyn SanctionLookup>) -> Self {
        self.sanctions = Some(sanctions);
        self
    }

    /// Share counters with other components.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    /// Returns `BuildError::MissingDirectory` if no directory was supplied.
    pub fn build(self) -> Result<AbuseGuard, BuildError> {
        let directory = self.directory.ok_or(BuildError::MissingDirectory)?;
        let metrics = self.metrics.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        Ok(AbuseGuard {
            limiter: TieredRateLimiter::new(self.quotas, metrics.clone()),
            directory,
            sink: self.sink,
            clock,
            sanctions: self.sanctions,
            metrics,
        })
    }
}

/// Synchronous admission control for API requests.
#[derive(Debug, Clone)]
pub struct AbuseGuard {
    limiter: TieredRateLimiter,
    directory: Arc<dyn PrincipalDirectory>,
    sink: Option<Arc<dyn EventSink>>,
    clock: Arc<dyn Clock>,
    sanctions: Option<Arc<dyn SanctionLookup>>,
    metrics: Metrics,
}

impl AbuseGuard {
    pub fn builder() -> AbuseGuardBuilder {
        AbuseGuardBuilder {
            quotas: QuotaTable::default(),
            directory: None,
            sink: None,
            clock: None,
            sanctions: None,
            metrics: None,
        }
    }

    /// Decide whether `request` may proceed.
    pub fn admit(&self, request: ApiRequest) -> Admission {
        let now = self.clock.now();

        let principal = match self.directory.lookup(&request.token) {
            Ok(Some(principal)) => principal,
            Ok(None) => {
                self.metrics.record_rejected_unknown();
                tracing::debug!(source = %request.source, "unknown token");
                return Admission::Rejected(Rejection::new(RejectReason::UnknownPrincipal, None));
            }
            Err(DirectoryError::UnknownTier { account, tier }) => {
                self.metrics.record_rejected_unknown();
                tracing::error!(%account, error = %tier, "account has no usable tier; rejecting");
                return Admission::Rejected(Rejection::new(RejectReason::UnknownTier, None));
            }
            Err(e) => {
                self.metrics.record_rejected_unknown();
                tracing::error!(error = %e, "principal lookup failed; rejecting");
                return Admission::Rejected(Rejection::new(RejectReason::UnknownPrincipal, None));
            }
        };

        if let Some(remaining) = self
            .sanctions
            .as_ref()
            .and_then(|sanctions| sanctions.remaining(&principal, Some(request.source), now))
        {
            self.metrics.record_rejected_sanctioned();
            tracing::debug!(principal = %principal.account, source = %request.source, "sanctioned caller rejected");
            self.log(&principal, &request, Outcome::RateLimited, now);
            return Admission::Rejected(Rejection::new(RejectReason::Sanctioned, Some(remaining)));
        }

        match self.limiter.check(&principal, now) {
            LimitDecision::Allow => Admission::Allowed(Admitted {
                principal,
                request,
                at: now,
            }),
            LimitDecision::Reject(rejection) => {
                self.log(&principal, &request, Outcome::RateLimited, now);
                Admission::Rejected(rejection)
            }
        }
    }

    /// Log how an admitted request ended.
    pub fn record(&self, admitted: Admitted, outcome: Outcome) {
        self.log(&admitted.principal, &admitted.request, outcome, admitted.at);
    }

    pub fn limiter(&self) -> &TieredRateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn log(&self, principal: &Principal, request: &ApiRequest, outcome: Outcome, at: DateTime<Utc>) {
        let Some(sink) = &self.sink else {
            return;
        };
        let event = RequestEvent {
            timestamp: at,
            principal_id: principal.id.clone(),
            source_address: request.source,
            endpoint: request.endpoint.clone(),
            outcome,
            params: request.params.clone(),
        };
        if let Err(e) = sink.append(&event) {
            self.metrics.record_event_log_failure();
            tracing::warn!(error = %e, "failed to append to event log");
        }
    }
}
