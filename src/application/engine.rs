//! Enforcement state machine.
//!
//! Per `(subject, action_kind)` the engine moves a sanction through
//! `None -> Active -> Expired -> Reverted`:
//!
//! - An abuse flag with no existing record calls the adapter's `apply`. Only
//!   a confirmed apply creates and persists the record; a failed apply is
//!   parked in the pending queue and retried on the next sweep.
//! - A flag for an action that already has a record is a no-op, so a noisy
//!   window can never stretch `expires_at`.
//! - A record is expired once `now >= expires_at`. Reconciliation calls
//!   `revert` and deletes the record only after the adapter confirms it.
//!
//! Every transition for one key runs under that key's async mutex, so a
//! re-flag cannot interleave with the expiry of the same sanction.

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::application::metrics::Metrics;
use crate::application::ports::{
    AdapterError, EnforcementAdapter, EnforcementJournal, JournalKind, PrincipalDirectory,
    SanctionLookup, SanctionStore, StoreError,
};
use crate::domain::principal::Principal;
use crate::domain::sanction::{AbuseFlag, EnforcementAction, SanctionRecord};
use crate::domain::time::MAX_DURATION;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Error returned when engine configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineConfigError {
    ZeroBlockDuration,
    ZeroAdapterTimeout,
    /// Neither network blocks nor account locks are enabled
    NoActions,
    /// Block duration or adapter timeout is longer than `MAX_DURATION`
    DurationTooLarge(Duration),
}

impl std::fmt::Display for EngineConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineConfigError::ZeroBlockDuration => write!(f, "block duration must be greater than 0"),
            EngineConfigError::ZeroAdapterTimeout => {
                write!(f, "adapter timeout must be greater than 0")
            }
            EngineConfigError::NoActions => write!(f, "at least one enforcement action must be enabled"),
            EngineConfigError::DurationTooLarge(d) => {
                write!(f, "duration {:?} exceeds the maximum of {:?}", d, MAX_DURATION)
            }
        }
    }
}

impl std::error::Error for EngineConfigError {}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a sanction stays active
    pub block_duration: Duration,
    /// Upper bound on a single adapter call
    pub adapter_timeout: Duration,
    /// Failed attempts after which an action is escalated
    pub max_adapter_retries: u32,
    /// Block every source address a flagged principal used
    pub block_addresses: bool,
    /// Lock the flagged principal's backing account
    pub lock_accounts: bool,
    pub breaker: CircuitBreakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_duration: Duration::from_secs(600),
            adapter_timeout: Duration::from_secs(10),
            max_adapter_retries: 5,
            block_addresses: true,
            lock_accounts: false,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        if self.block_duration.is_zero() {
            return Err(EngineConfigError::ZeroBlockDuration);
        }
        if self.adapter_timeout.is_zero() {
            return Err(EngineConfigError::ZeroAdapterTimeout);
        }
        for d in [self.block_duration, self.adapter_timeout] {
            if d > MAX_DURATION {
                return Err(EngineConfigError::DurationTooLarge(d));
            }
        }
        if !self.block_addresses && !self.lock_accounts {
            return Err(EngineConfigError::NoActions);
        }
        Ok(())
    }
}

/// What happened to one action derived from a flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The adapter confirmed the action and a record was created
    Applied,
    /// A record already exists; nothing changed
    AlreadyActive,
    /// The adapter call failed; the action is pending for the next sweep
    Deferred(AdapterError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub reverted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records read from the store
    pub loaded: usize,
    pub reconciled: ReconcileReport,
}

#[derive(Debug, Clone)]
struct PendingApply {
    reason: String,
    attempts: u32,
}

#[derive(Debug, Clone, Copy)]
enum AdapterOp {
    Apply,
    Revert,
}

/// Owns sanction records and drives the enforcement adapter.
#[derive(Debug)]
pub struct EnforcementEngine {
    config: EngineConfig,
    adapter: Arc<dyn EnforcementAdapter>,
    store: Arc<dyn SanctionStore>,
    journal: Arc<dyn EnforcementJournal>,
    directory: Option<Arc<dyn PrincipalDirectory>>,
    records: DashMap<EnforcementAction, SanctionRecord>,
    pending: DashMap<EnforcementAction, PendingApply>,
    locks: DashMap<EnforcementAction, Arc<tokio::sync::Mutex<()>>>,
    persist_lock: Mutex<()>,
    dirty: AtomicBool,
    breaker: CircuitBreaker,
    metrics: Metrics,
}

impl EnforcementEngine {
    pub fn new(
        config: EngineConfig,
        adapter: Arc<dyn EnforcementAdapter>,
        store: Arc<dyn SanctionStore>,
        journal: Arc<dyn EnforcementJournal>,
        metrics: Metrics,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker.clone());
        Self {
            config,
            adapter,
            store,
            journal,
            directory: None,
            records: DashMap::new(),
            pending: DashMap::new(),
            locks: DashMap::new(),
            persist_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
            breaker,
            metrics,
        }
    }

    /// Directory used to resolve a flagged token to its account for locks.
    pub fn with_directory(mut self, directory: Arc<dyn PrincipalDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Load persisted records and immediately revert every overdue one.
    ///
    /// Must complete before the first sweep.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<RecoveryReport, StoreError> {
        let loaded = self.store.load()?;
        let count = loaded.len();
        for record in loaded {
            let action = record.action();
            if self.records.contains_key(&action) {
                tracing::warn!(action = %action, "duplicate sanction record in store; keeping first");
                continue;
            }
            self.records.insert(action, record);
        }
        tracing::info!(records = count, "loaded persisted sanctions");

        let reconciled = self.reconcile(now).await;
        Ok(RecoveryReport {
            loaded: count,
            reconciled,
        })
    }

    /// Turn one flag into enforcement actions and activate each of them.
    pub async fn handle_flag(
        &self,
        flag: &AbuseFlag,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Vec<(EnforcementAction, Activation)> {
        let mut results = Vec::new();
        for action in self.plan(flag) {
            let activation = self.activate(&action, reason, now).await;
            results.push((action, activation));
        }
        results
    }

    /// `None -> Active` for a single action.
    pub async fn activate(
        &self,
        action: &EnforcementAction,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Activation {
        let lock = self.key_lock(action);
        let activation = {
            let _guard = lock.lock().await;
            self.activate_locked(action, reason, now).await
        };
        drop(lock);
        self.release_key_lock(action);
        activation
    }

    async fn activate_locked(
        &self,
        action: &EnforcementAction,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Activation {
        if self.records.contains_key(action) {
            self.pending.remove(action);
            tracing::debug!(action = %action, "already sanctioned; flag ignored");
            return Activation::AlreadyActive;
        }

        match self.call_adapter(AdapterOp::Apply, action).await {
            Ok(()) => {
                let record = SanctionRecord::new(action, now, self.config.block_duration, reason);
                let message = format!(
                    "{} {} until {}: {}",
                    record.action_kind,
                    record.subject,
                    record.expires_at.to_rfc3339(),
                    record.reason
                );
                self.records.insert(action.clone(), record);
                self.pending.remove(action);
                self.metrics.record_applied();
                self.persist();
                self.write_journal(now, JournalKind::Blocked, &message);
                tracing::info!(action = %action, reason, "sanction applied");
                Activation::Applied
            }
            Err(e) => {
                self.metrics.record_adapter_failure();
                let attempts = {
                    let mut entry = self.pending.entry(action.clone()).or_insert_with(|| PendingApply {
                        reason: reason.to_string(),
                        attempts: 0,
                    });
                    entry.attempts += 1;
                    entry.attempts
                };
                tracing::warn!(action = %action, attempts, error = %e, "apply failed; will retry next sweep");
                self.escalate_if_due(action, "apply", attempts, &e);
                Activation::Deferred(e)
            }
        }
    }

    /// Retry every action whose apply previously failed.
    pub async fn retry_pending(&self, now: DateTime<Utc>) -> usize {
        let queued: Vec<(EnforcementAction, String)> = self
            .pending
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().reason.clone()))
            .collect();

        let mut applied = 0;
        for (action, reason) in queued {
            if self.activate(&action, &reason, now).await == Activation::Applied {
                applied += 1;
            }
        }
        applied
    }

    /// Revert every expired record. Failed reversals stay for the next cycle.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> ReconcileReport {
        let mut expired: Vec<EnforcementAction> = self
            .records
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        expired.sort();

        let mut report = ReconcileReport::default();
        for action in expired {
            let lock = self.key_lock(&action);
            let reverted = {
                let _guard = lock.lock().await;
                self.revert_locked(&action, now).await
            };
            drop(lock);
            self.release_key_lock(&action);
            match reverted {
                Some(true) => report.reverted += 1,
                Some(false) => report.failed += 1,
                None => {}
            }
        }

        if report.reverted > 0 || report.failed > 0 {
            tracing::info!(reverted = report.reverted, failed = report.failed, "reconciled expired sanctions");
        }
        report
    }

    // None when the record vanished or is no longer expired.
    async fn revert_locked(&self, action: &EnforcementAction, now: DateTime<Utc>) -> Option<bool> {
        let still_expired = self.records.get(action).map(|r| r.is_expired(now))?;
        if !still_expired {
            return None;
        }

        match self.call_adapter(AdapterOp::Revert, action).await {
            Ok(()) => {
                self.records.remove(action);
                self.metrics.record_reverted();
                self.persist();
                self.write_journal(
                    now,
                    JournalKind::Unblocked,
                    &format!("{} {}", action.action_kind, action.subject),
                );
                tracing::info!(action = %action, "sanction reverted");
                Some(true)
            }
            Err(e) => {
                self.metrics.record_adapter_failure();
                let attempts = match self.records.get_mut(action) {
                    Some(mut record) => {
                        record.revert_attempts += 1;
                        record.revert_attempts
                    }
                    None => return Some(false),
                };
                self.persist();
                tracing::warn!(action = %action, attempts, error = %e, "revert failed; will retry next cycle");
                self.escalate_if_due(action, "revert", attempts, &e);
                Some(false)
            }
        }
    }

    /// Remaining time of the longest active sanction covering `principal`
    /// or `address`. Expired records do not count, even before reversal.
    pub fn is_sanctioned(
        &self,
        principal: &Principal,
        address: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        EnforcementAction::covering(&principal.account, address)
            .iter()
            .filter_map(|key| self.records.get(key))
            .filter(|record| !record.is_expired(now))
            .map(|record| record.remaining(now))
            .max()
    }

    /// All records, active and expired-but-unreverted, in key order.
    pub fn sanctions(&self) -> Vec<SanctionRecord> {
        let mut records: Vec<SanctionRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| (a.action_kind, &a.subject).cmp(&(b.action_kind, &b.subject)));
        records
    }

    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.records.iter().filter(|entry| !entry.value().is_expired(now)).count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Retry a store write that failed earlier.
    pub fn flush_if_dirty(&self) {
        if self.dirty.load(Ordering::Acquire) {
            self.persist();
        }
    }

    fn plan(&self, flag: &AbuseFlag) -> Vec<EnforcementAction> {
        let mut actions = Vec::new();
        if self.config.block_addresses {
            actions.extend(flag.source_addresses.iter().copied().map(EnforcementAction::network_block));
        }
        if self.config.lock_accounts {
            match self.resolve_account(&flag.principal_id) {
                Some(account) => actions.push(EnforcementAction::account_lock(account)),
                None => tracing::warn!(
                    principal = %flag.principal_id,
                    "cannot resolve account for flagged principal; skipping account lock"
                ),
            }
        }
        actions
    }

    fn resolve_account(&self, token: &str) -> Option<String> {
        let directory = self.directory.as_ref()?;
        match directory.lookup(token) {
            Ok(principal) => principal.map(|p| p.account),
            Err(e) => {
                tracing::warn!(error = %e, "account lookup failed");
                None
            }
        }
    }

    async fn call_adapter(&self, op: AdapterOp, action: &EnforcementAction) -> Result<(), AdapterError> {
        if !self.breaker.permit() {
            return Err(AdapterError::CircuitOpen);
        }

        let call = match op {
            AdapterOp::Apply => self.adapter.apply(action),
            AdapterOp::Revert => self.adapter.revert(action),
        };
        let timeout = self.config.adapter_timeout;
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(timeout)),
        };

        match &result {
            Ok(()) => self.breaker.on_success(),
            Err(_) => self.breaker.on_failure(),
        }
        result
    }

    fn escalate_if_due(&self, action: &EnforcementAction, op: &str, attempts: u32, error: &AdapterError) {
        if attempts == self.config.max_adapter_retries {
            self.metrics.record_escalation();
            tracing::error!(
                action = %action,
                op,
                attempts,
                error = %error,
                "enforcement adapter keeps failing; manual intervention required"
            );
        }
    }

    fn persist(&self) {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        match self.store.save(&self.sanctions()) {
            Ok(()) => self.dirty.store(false, Ordering::Release),
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                self.metrics.record_store_failure();
                tracing::error!(error = %e, "failed to persist sanctions; keeping in-memory state");
            }
        }
    }

    fn write_journal(&self, at: DateTime<Utc>, kind: JournalKind, message: &str) {
        if let Err(e) = self.journal.record(at, kind, message) {
            tracing::warn!(error = %e, tag = kind.tag(), "failed to write enforcement journal");
        }
    }

    fn key_lock(&self, action: &EnforcementAction) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(action.clone()).or_default().clone()
    }

    fn release_key_lock(&self, action: &EnforcementAction) {
        self.locks.remove_if(action, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl SanctionLookup for EnforcementEngine {
    fn remaining(&self, principal: &Principal, address: Option<IpAddr>, now: DateTime<Utc>) -> Option<Duration> {
        self.is_sanctioned(principal, address, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::{MemoryJournal, MemoryStore, RecordingAdapter};
    use chrono::{TimeDelta, TimeZone};
    use std::collections::BTreeSet;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        engine: EnforcementEngine,
        adapter: Arc<RecordingAdapter>,
        store: Arc<MemoryStore>,
        journal: Arc<MemoryJournal>,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let adapter = Arc::new(RecordingAdapter::new());
        let store = Arc::new(MemoryStore::new());
        let journal = Arc::new(MemoryJournal::new());
        let engine = EnforcementEngine::new(
            config,
            adapter.clone(),
            store.clone(),
            journal.clone(),
            Metrics::new(),
        );
        Fixture {
            engine,
            adapter,
            store,
            journal,
        }
    }

    fn flag(token: &str, addrs: &[&str]) -> AbuseFlag {
        AbuseFlag {
            principal_id: token.to_string(),
            window_count: 150,
            detected_at: t0(),
            source_addresses: addrs.iter().map(|a| a.parse().unwrap()).collect::<BTreeSet<_>>(),
        }
    }

    #[tokio::test]
    async fn test_reflag_is_noop() {
        let f = fixture(EngineConfig::default());
        let flag = flag("tok", &["10.0.0.1"]);

        let first = f.engine.handle_flag(&flag, "burst", t0()).await;
        let later = t0() + TimeDelta::seconds(30);
        let second = f.engine.handle_flag(&flag, "burst again", later).await;

        assert_eq!(first[0].1, Activation::Applied);
        assert_eq!(second[0].1, Activation::AlreadyActive);
        assert_eq!(f.adapter.apply_calls(), 1);

        let records = f.engine.sanctions();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].expires_at, t0() + TimeDelta::seconds(600));
        assert_eq!(records[0].reason, "burst");
    }

    #[tokio::test]
    async fn test_failed_apply_is_not_persisted_and_retried() {
        let f = fixture(EngineConfig::default());
        f.adapter.fail_next(1);
        let action = EnforcementAction::network_block("10.0.0.1".parse().unwrap());

        let first = f.engine.activate(&action, "burst", t0()).await;
        assert!(matches!(first, Activation::Deferred(AdapterError::Failed(_))));
        assert!(f.engine.sanctions().is_empty());
        assert!(f.store.records().is_empty());
        assert_eq!(f.engine.pending_count(), 1);

        let retry_at = t0() + TimeDelta::seconds(10);
        assert_eq!(f.engine.retry_pending(retry_at).await, 1);
        assert_eq!(f.engine.pending_count(), 0);
        assert!(f.adapter.is_blocked(&action));
        let records = f.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].created_at, retry_at);
    }

    #[tokio::test]
    async fn test_expiry_reverts_on_first_eligible_cycle() {
        let f = fixture(EngineConfig::default());
        let action = EnforcementAction::network_block("10.0.0.1".parse().unwrap());
        f.engine.activate(&action, "burst", t0()).await;

        let before = f.engine.reconcile(t0() + TimeDelta::seconds(599)).await;
        assert_eq!(before, ReconcileReport::default());
        assert!(f.adapter.is_blocked(&action));

        let at = f.engine.reconcile(t0() + TimeDelta::seconds(600)).await;
        assert_eq!(at.reverted, 1);
        assert!(!f.adapter.is_blocked(&action));
        assert!(f.store.records().is_empty());

        let lines = f.journal.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[BLOCKED]") && lines[0].contains("10.0.0.1"));
        assert!(lines[1].contains("[UNBLOCKED]") && lines[1].contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_failed_revert_keeps_record_and_escalates() {
        let config = EngineConfig {
            max_adapter_retries: 2,
            breaker: CircuitBreakerConfig {
                failure_threshold: 100,
                cooldown: Duration::from_secs(30),
            },
            ..EngineConfig::default()
        };
        let f = fixture(config);
        let action = EnforcementAction::network_block("10.0.0.1".parse().unwrap());
        f.engine.activate(&action, "burst", t0()).await;

        f.adapter.set_failing(true);
        let expired = t0() + TimeDelta::seconds(700);
        for _ in 0..3 {
            assert_eq!(f.engine.reconcile(expired).await.failed, 1);
        }
        assert_eq!(f.engine.metrics.escalations(), 1);
        assert_eq!(f.store.records()[0].revert_attempts, 3);

        f.adapter.set_failing(false);
        assert_eq!(f.engine.reconcile(expired).await.reverted, 1);
        assert!(f.engine.sanctions().is_empty());
    }

    #[tokio::test]
    async fn test_expired_record_does_not_sanction() {
        let f = fixture(EngineConfig::default());
        let principal = Principal::new("tok", crate::domain::principal::Tier::Free, "alice");
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        f.engine.handle_flag(&flag("tok", &["10.0.0.1"]), "burst", t0()).await;

        let mid = t0() + TimeDelta::seconds(100);
        assert_eq!(f.engine.is_sanctioned(&principal, Some(addr), mid), Some(Duration::from_secs(500)));
        assert_eq!(f.engine.is_sanctioned(&principal, None, mid), None);

        f.adapter.set_failing(true);
        let late = t0() + TimeDelta::seconds(601);
        f.engine.reconcile(late).await;
        assert_eq!(f.engine.sanctions().len(), 1);
        assert_eq!(f.engine.is_sanctioned(&principal, Some(addr), late), None);
    }

    #[tokio::test]
    async fn test_open_circuit_defers_without_calling_adapter() {
        let config = EngineConfig {
            breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(60),
            },
            ..EngineConfig::default()
        };
        let f = fixture(config);
        f.adapter.fail_next(1);
        let a = EnforcementAction::network_block("10.0.0.1".parse().unwrap());
        let b = EnforcementAction::network_block("10.0.0.2".parse().unwrap());

        f.engine.activate(&a, "burst", t0()).await;
        let second = f.engine.activate(&b, "burst", t0()).await;

        assert_eq!(second, Activation::Deferred(AdapterError::CircuitOpen));
        assert_eq!(f.adapter.apply_calls(), 1);
        assert_eq!(f.engine.pending_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_adapter_times_out() {
        let config = EngineConfig {
            adapter_timeout: Duration::from_millis(100),
            ..EngineConfig::default()
        };
        let f = fixture(config);
        f.adapter.set_delay(Duration::from_secs(5));
        let action = EnforcementAction::network_block("10.0.0.1".parse().unwrap());

        let result = f.engine.activate(&action, "burst", t0()).await;
        assert_eq!(result, Activation::Deferred(AdapterError::Timeout(Duration::from_millis(100))));
        assert!(f.engine.sanctions().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_state_and_flushes_later() {
        let f = fixture(EngineConfig::default());
        f.store.set_failing(true);
        let action = EnforcementAction::network_block("10.0.0.1".parse().unwrap());

        assert_eq!(f.engine.activate(&action, "burst", t0()).await, Activation::Applied);
        assert_eq!(f.engine.sanctions().len(), 1);
        assert_eq!(f.engine.metrics.store_failures(), 1);

        f.store.set_failing(false);
        f.engine.flush_if_dirty();
        assert_eq!(f.store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_flags_apply_once() {
        let f = fixture(EngineConfig::default());
        let engine = Arc::new(f.engine);
        let action = EnforcementAction::network_block("10.0.0.1".parse().unwrap());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let action = action.clone();
                tokio::spawn(async move { engine.activate(&action, "burst", t0()).await })
            })
            .collect();
        let mut applied = 0;
        for task in tasks {
            if task.await.unwrap() == Activation::Applied {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(f.adapter.apply_calls(), 1);
        assert_eq!(engine.sanctions().len(), 1);
        assert!(engine.locks.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let none = EngineConfig {
            block_addresses: false,
            lock_accounts: false,
            ..EngineConfig::default()
        };
        assert_eq!(none.validate(), Err(EngineConfigError::NoActions));
        assert!(EngineConfig::default().validate().is_ok());

        let forever = EngineConfig {
            block_duration: Duration::from_secs(i64::MAX as u64),
            ..EngineConfig::default()
        };
        assert_eq!(
            forever.validate(),
            Err(EngineConfigError::DurationTooLarge(forever.block_duration))
        );
    }
}
