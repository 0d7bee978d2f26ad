//! Per-tier quota policies and the fixed-window counter they drive.
//!
//! A [`QuotaPolicy`] allows `max_requests` per `window` and additionally
//! requires `min_interval` between two accepted requests. [`FixedWindow`] is
//! the per-principal state the limiter mutates on every check.

use crate::domain::principal::Tier;
use crate::domain::time::{saturating_add, to_delta, to_std, MAX_DURATION};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Error returned when a quota policy or quota table is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// `max_requests` must be greater than zero
    ZeroMaxRequests,
    /// The counting window must be longer than zero
    ZeroWindow,
    /// A tier has no policy in the table
    MissingTier(Tier),
    /// Window or spacing is longer than `MAX_DURATION`
    DurationTooLarge(Duration),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::ZeroMaxRequests => write!(f, "max_requests must be greater than 0"),
            PolicyError::ZeroWindow => write!(f, "window duration must be greater than 0"),
            PolicyError::MissingTier(tier) => write!(f, "no quota policy for tier '{}'", tier),
            PolicyError::DurationTooLarge(d) => {
                write!(f, "duration {:?} exceeds the maximum of {:?}", d, MAX_DURATION)
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Quota parameters for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub max_requests: u32,
    pub window: Duration,
    pub min_interval: Duration,
}

impl QuotaPolicy {
    /// Create a validated policy.
    ///
    /// # Errors
    /// Returns `PolicyError::ZeroMaxRequests`, `PolicyError::ZeroWindow` or
    /// `PolicyError::DurationTooLarge`.
    pub fn new(
        max_requests: u32,
        window: Duration,
        min_interval: Duration,
    ) -> Result<Self, PolicyError> {
        if max_requests == 0 {
            return Err(PolicyError::ZeroMaxRequests);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        if let Some(&too_long) = [window, min_interval].iter().find(|d| **d > MAX_DURATION) {
            return Err(PolicyError::DurationTooLarge(too_long));
        }
        Ok(Self {
            max_requests,
            window,
            min_interval,
        })
    }

    /// Default policy for a tier: 15, 30 and 60 requests per minute with a
    /// 6s, 2s and 1s minimum spacing.
    pub fn default_for(tier: Tier) -> Self {
        let (max_requests, min_interval) = match tier {
            Tier::Free => (15, 6),
            Tier::Plus => (30, 2),
            Tier::Pro => (60, 1),
        };
        Self {
            max_requests,
            window: Duration::from_secs(60),
            min_interval: Duration::from_secs(min_interval),
        }
    }
}

/// Lookup table from tier to quota policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaTable {
    policies: BTreeMap<Tier, QuotaPolicy>,
}

impl QuotaTable {
    /// Build a complete table. Every tier must have a policy.
    ///
    /// # Errors
    /// Returns `PolicyError::MissingTier` naming the first tier without a policy.
    pub fn new(policies: impl IntoIterator<Item = (Tier, QuotaPolicy)>) -> Result<Self, PolicyError> {
        let table = Self::partial(policies);
        if let Some(tier) = Tier::ALL.into_iter().find(|t| !table.policies.contains_key(t)) {
            return Err(PolicyError::MissingTier(tier));
        }
        Ok(table)
    }

    /// Build a table that may leave tiers out. Principals of a missing tier
    /// are rejected by the limiter.
    pub fn partial(policies: impl IntoIterator<Item = (Tier, QuotaPolicy)>) -> Self {
        Self {
            policies: policies.into_iter().collect(),
        }
    }

    pub fn get(&self, tier: Tier) -> Option<&QuotaPolicy> {
        self.policies.get(&tier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tier, &QuotaPolicy)> {
        self.policies.iter()
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self::partial(Tier::ALL.map(|t| (t, QuotaPolicy::default_for(t))))
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The window's request budget is spent
    QuotaExceeded,
    /// The previous accepted request was too recent
    MinInterval,
    /// The caller or its address is under an active sanction
    Sanctioned,
    /// The caller's tier has no quota policy
    UnknownTier,
    /// The token does not belong to any known principal
    UnknownPrincipal,
}

impl RejectReason {
    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::QuotaExceeded => "quota_exceeded",
            RejectReason::MinInterval => "min_interval",
            RejectReason::Sanctioned => "sanctioned",
            RejectReason::UnknownTier => "unknown_tier",
            RejectReason::UnknownPrincipal => "unknown_principal",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of registering one request against a [`FixedWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    Reject {
        reason: RejectReason,
        retry_after: Duration,
    },
}

impl QuotaDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, QuotaDecision::Allow)
    }

    pub fn is_reject(&self) -> bool {
        !self.is_allow()
    }
}

/// Fixed-window counter for a single principal.
///
/// Rejected requests consume neither quota nor the minimum interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindow {
    window_start: DateTime<Utc>,
    count: u32,
    last_accepted: Option<DateTime<Utc>>,
}

impl FixedWindow {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 0,
            last_accepted: None,
        }
    }

    /// Register a request at `now` and decide whether it may proceed.
    pub fn register_request(&mut self, policy: &QuotaPolicy, now: DateTime<Utc>) -> QuotaDecision {
        // A clock that went backwards restarts the window at `now`.
        if now < self.window_start || now - self.window_start >= to_delta(policy.window) {
            self.window_start = now;
            self.count = 0;
        }

        if let Some(last) = self.last_accepted {
            if now < last {
                self.last_accepted = Some(now);
            }
        }

        if let Some(last) = self.last_accepted {
            let since_last = now - last;
            let min_interval = to_delta(policy.min_interval);
            if since_last < min_interval {
                return QuotaDecision::Reject {
                    reason: RejectReason::MinInterval,
                    retry_after: to_std(min_interval - since_last),
                };
            }
        }

        if self.count >= policy.max_requests {
            let window_end = saturating_add(self.window_start, policy.window);
            return QuotaDecision::Reject {
                reason: RejectReason::QuotaExceeded,
                retry_after: to_std(window_end - now),
            };
        }

        self.count += 1;
        self.last_accepted = Some(now);
        QuotaDecision::Allow
    }

    /// True when the state carries no information that could affect a
    /// request at `now`, so it can be dropped.
    pub fn is_idle(&self, policy: &QuotaPolicy, now: DateTime<Utc>) -> bool {
        let window_over = now - self.window_start >= to_delta(policy.window);
        let spacing_over = self
            .last_accepted
            .map_or(true, |last| now - last >= to_delta(policy.min_interval));
        window_over && spacing_over
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(n)
    }

    #[test]
    fn test_policy_validation() {
        assert_eq!(
            QuotaPolicy::new(0, Duration::from_secs(60), Duration::ZERO),
            Err(PolicyError::ZeroMaxRequests)
        );
        assert_eq!(
            QuotaPolicy::new(5, Duration::ZERO, Duration::ZERO),
            Err(PolicyError::ZeroWindow)
        );
        assert!(QuotaPolicy::new(5, Duration::from_secs(60), Duration::ZERO).is_ok());

        let huge = Duration::from_secs(i64::MAX as u64);
        assert_eq!(
            QuotaPolicy::new(5, huge, Duration::ZERO),
            Err(PolicyError::DurationTooLarge(huge))
        );
        assert_eq!(
            QuotaPolicy::new(5, Duration::from_secs(60), huge),
            Err(PolicyError::DurationTooLarge(huge))
        );
    }

    #[test]
    fn test_complete_table_requires_every_tier() {
        let only_free = [(Tier::Free, QuotaPolicy::default_for(Tier::Free))];
        assert_eq!(
            QuotaTable::new(only_free).unwrap_err(),
            PolicyError::MissingTier(Tier::Plus)
        );

        let all = Tier::ALL.map(|t| (t, QuotaPolicy::default_for(t)));
        let table = QuotaTable::new(all).unwrap();
        assert_eq!(table.get(Tier::Pro).unwrap().max_requests, 60);
    }

    #[test]
    fn test_count_cap_and_rollover() {
        let policy = QuotaPolicy::new(3, Duration::from_secs(60), Duration::ZERO).unwrap();
        let mut window = FixedWindow::new(t0());

        for i in 0..3 {
            assert!(window.register_request(&policy, t0() + secs(i)).is_allow());
        }

        let decision = window.register_request(&policy, t0() + secs(10));
        assert_eq!(
            decision,
            QuotaDecision::Reject {
                reason: RejectReason::QuotaExceeded,
                retry_after: Duration::from_secs(50),
            }
        );

        // First request of the next window
        assert!(window.register_request(&policy, t0() + secs(60)).is_allow());
        assert_eq!(window.count(), 1);
    }

    #[test]
    fn test_min_interval_does_not_consume_quota() {
        let policy = QuotaPolicy::new(2, Duration::from_secs(60), Duration::from_secs(5)).unwrap();
        let mut window = FixedWindow::new(t0());

        assert!(window.register_request(&policy, t0()).is_allow());
        let decision = window.register_request(&policy, t0() + secs(2));
        assert_eq!(
            decision,
            QuotaDecision::Reject {
                reason: RejectReason::MinInterval,
                retry_after: Duration::from_secs(3),
            }
        );
        assert_eq!(window.count(), 1);

        assert!(window.register_request(&policy, t0() + secs(5)).is_allow());
        assert_eq!(window.count(), 2);
    }

    #[test]
    fn test_clock_moving_backwards_clamps_to_now() {
        let policy = QuotaPolicy::new(2, Duration::from_secs(60), Duration::ZERO).unwrap();
        let mut window = FixedWindow::new(t0());
        assert!(window.register_request(&policy, t0()).is_allow());
        assert!(window.register_request(&policy, t0()).is_allow());
        assert!(window.register_request(&policy, t0()).is_reject());

        let earlier = t0() - secs(30);
        assert!(window.register_request(&policy, earlier).is_allow());
        assert_eq!(window.window_start(), earlier);
    }

    #[test]
    fn test_idle_detection() {
        let policy = QuotaPolicy::new(2, Duration::from_secs(60), Duration::from_secs(6)).unwrap();
        let mut window = FixedWindow::new(t0());
        window.register_request(&policy, t0());

        assert!(!window.is_idle(&policy, t0() + secs(30)));
        assert!(window.is_idle(&policy, t0() + secs(60)));
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(RejectReason::QuotaExceeded.code(), "quota_exceeded");
        assert_eq!(RejectReason::Sanctioned.to_string(), "sanctioned");
        assert_eq!(
            serde_json::to_string(&RejectReason::MinInterval).unwrap(),
            "\"min_interval\""
        );
    }
}
