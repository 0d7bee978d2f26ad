//! Observability counters for the request path and the sweep path.
//!
//! All counters are atomics behind an `Arc`; clones share the same values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters describing limiter decisions and enforcement activity.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    requests_allowed: AtomicU64,
    rejected_quota: AtomicU64,
    rejected_interval: AtomicU64,
    rejected_sanctioned: AtomicU64,
    rejected_unknown: AtomicU64,
    event_log_failures: AtomicU64,
    parse_errors: AtomicU64,
    flags_raised: AtomicU64,
    sanctions_applied: AtomicU64,
    sanctions_reverted: AtomicU64,
    adapter_failures: AtomicU64,
    store_failures: AtomicU64,
    escalations: AtomicU64,
    sweeps_completed: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $read:ident) => {
        pub(crate) fn $record(&self) {
            self.inner.$read.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $read(&self) -> u64 {
            self.inner.$read.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_allowed, requests_allowed);
    counter!(record_rejected_quota, rejected_quota);
    counter!(record_rejected_interval, rejected_interval);
    counter!(record_rejected_sanctioned, rejected_sanctioned);
    counter!(record_rejected_unknown, rejected_unknown);
    counter!(record_event_log_failure, event_log_failures);
    counter!(record_applied, sanctions_applied);
    counter!(record_reverted, sanctions_reverted);
    counter!(record_adapter_failure, adapter_failures);
    counter!(record_store_failure, store_failures);
    counter!(record_escalation, escalations);
    counter!(record_sweep, sweeps_completed);

    pub(crate) fn add_parse_errors(&self, n: u64) {
        self.inner.parse_errors.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_flags(&self, n: u64) {
        self.inner.flags_raised.fetch_add(n, Ordering::Relaxed);
    }

    /// Malformed event log lines skipped across all scans.
    pub fn parse_errors(&self) -> u64 {
        self.inner.parse_errors.load(Ordering::Relaxed)
    }

    pub fn flags_raised(&self) -> u64 {
        self.inner.flags_raised.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_allowed: self.requests_allowed(),
            rejected_quota: self.rejected_quota(),
            rejected_interval: self.rejected_interval(),
            rejected_sanctioned: self.rejected_sanctioned(),
            rejected_unknown: self.rejected_unknown(),
            event_log_failures: self.event_log_failures(),
            parse_errors: self.parse_errors(),
            flags_raised: self.flags_raised(),
            sanctions_applied: self.sanctions_applied(),
            sanctions_reverted: self.sanctions_reverted(),
            adapter_failures: self.adapter_failures(),
            store_failures: self.store_failures(),
            escalations: self.escalations(),
            sweeps_completed: self.sweeps_completed(),
        }
    }
}

/// A point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests_allowed: u64,
    pub rejected_quota: u64,
    pub rejected_interval: u64,
    pub rejected_sanctioned: u64,
    pub rejected_unknown: u64,
    pub event_log_failures: u64,
    pub parse_errors: u64,
    pub flags_raised: u64,
    pub sanctions_applied: u64,
    pub sanctions_reverted: u64,
    pub adapter_failures: u64,
    pub store_failures: u64,
    pub escalations: u64,
    pub sweeps_completed: u64,
}

impl MetricsSnapshot {
    pub fn requests_rejected(&self) -> u64 {
        self.rejected_quota
            .saturating_add(self.rejected_interval)
            .saturating_add(self.rejected_sanctioned)
            .saturating_add(self.rejected_unknown)
    }

    /// Fraction of checked requests that were rejected (0.0 to 1.0).
    pub fn rejection_rate(&self) -> f64 {
        let rejected = self.requests_rejected();
        let total = self.requests_allowed.saturating_add(rejected);
        if total == 0 {
            0.0
        } else {
            rejected as f64 / total as f64
        }
    }
}
