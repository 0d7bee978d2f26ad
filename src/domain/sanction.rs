//! Sanctions, abuse flags and the enforcement lifecycle.
//!
//! A sanction is keyed by [`EnforcementAction`] (subject plus action kind),
//! so at most one record exists per pair. Records move through
//! `Active -> Expired` purely by time; the engine deletes a record only once
//! the adapter has confirmed its reversal.

use crate::domain::time::{saturating_add, to_std};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Kind of external enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Drop traffic from a source address
    NetworkBlock,
    /// Disable the principal's backing account
    AccountLock,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::NetworkBlock => "network_block",
            ActionKind::AccountLock => "account_lock",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enforcement action against one subject.
///
/// The subject is a source address for `NetworkBlock` and an account name
/// for `AccountLock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnforcementAction {
    pub action_kind: ActionKind,
    pub subject: String,
}

impl EnforcementAction {
    pub fn network_block(address: IpAddr) -> Self {
        Self {
            action_kind: ActionKind::NetworkBlock,
            subject: address.to_string(),
        }
    }

    pub fn account_lock(account: impl Into<String>) -> Self {
        Self {
            action_kind: ActionKind::AccountLock,
            subject: account.into(),
        }
    }

    /// Every key whose sanction shuts out a caller of `account` from `address`.
    pub fn covering(account: &str, address: Option<IpAddr>) -> Vec<Self> {
        let mut keys = vec![Self::account_lock(account)];
        keys.extend(address.map(Self::network_block));
        keys
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.action_kind, self.subject)
    }
}

/// Time-derived state of a sanction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanctionState {
    Active,
    Expired,
}

/// Persisted sanction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanctionRecord {
    pub subject: String,
    pub action_kind: ActionKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    /// Failed reversal attempts so far.
    #[serde(default)]
    pub revert_attempts: u32,
}

impl SanctionRecord {
    pub fn new(
        action: &EnforcementAction,
        created_at: DateTime<Utc>,
        duration: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            subject: action.subject.clone(),
            action_kind: action.action_kind,
            created_at,
            expires_at: saturating_add(created_at, duration),
            reason: reason.into(),
            revert_attempts: 0,
        }
    }

    pub fn action(&self) -> EnforcementAction {
        EnforcementAction {
            action_kind: self.action_kind,
            subject: self.subject.clone(),
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> SanctionState {
        if now >= self.expires_at {
            SanctionState::Expired
        } else {
            SanctionState::Active
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == SanctionState::Expired
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        to_std(self.expires_at - now)
    }
}

/// A principal whose request volume crossed the abuse threshold.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AbuseFlag {
    pub principal_id: String,
    pub window_count: usize,
    pub detected_at: DateTime<Utc>,
    /// Source addresses the principal used inside the window
    pub source_addresses: BTreeSet<IpAddr>,
}

impl AbuseFlag {
    /// Human-readable reason carried into sanction records.
    pub fn describe(&self, window: Duration, threshold: usize) -> String {
        format!(
            "token={} issued {} requests within {}s (threshold {})",
            self.principal_id,
            self.window_count,
            window.as_secs(),
            threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_expiry_boundary() {
        let created = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let action = EnforcementAction::network_block("10.1.2.3".parse().unwrap());
        let record = SanctionRecord::new(&action, created, Duration::from_secs(300), "test");

        let just_before = created + chrono::TimeDelta::seconds(299);
        let at_expiry = created + chrono::TimeDelta::seconds(300);

        assert_eq!(record.state(just_before), SanctionState::Active);
        assert_eq!(record.remaining(just_before), Duration::from_secs(1));
        assert_eq!(record.state(at_expiry), SanctionState::Expired);
        assert_eq!(record.remaining(at_expiry), Duration::ZERO);
        assert_eq!(record.action(), action);
    }

    #[test]
    fn test_unbounded_duration_pins_expiry() {
        let created = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let action = EnforcementAction::network_block("10.1.2.3".parse().unwrap());
        let record = SanctionRecord::new(&action, created, Duration::from_secs(u64::MAX), "test");

        assert_eq!(record.expires_at, DateTime::<Utc>::MAX_UTC);
        assert_eq!(record.state(created), SanctionState::Active);
    }

    #[test]
    fn test_record_persisted_layout() {
        let created = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let action = EnforcementAction::account_lock("alice");
        let record = SanctionRecord::new(&action, created, Duration::from_secs(60), "burst");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["subject"], "alice");
        assert_eq!(json["action_kind"], "account_lock");
        assert_eq!(json["created_at"], "2025-03-01T12:00:00Z");
        assert_eq!(json["expires_at"], "2025-03-01T12:01:00Z");
        assert_eq!(json["reason"], "burst");
    }

    #[test]
    fn test_revert_attempts_default_when_absent() {
        let json = r#"{"subject":"10.0.0.1","action_kind":"network_block",
            "created_at":"2025-03-01T12:00:00Z","expires_at":"2025-03-01T12:05:00Z",
            "reason":"legacy"}"#;
        let record: SanctionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.revert_attempts, 0);
        assert_eq!(record.action_kind, ActionKind::NetworkBlock);
    }

    #[test]
    fn test_action_display() {
        let action = EnforcementAction::network_block("10.0.0.9".parse().unwrap());
        assert_eq!(action.to_string(), "network_block on 10.0.0.9");
    }
}
