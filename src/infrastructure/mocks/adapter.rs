//! In-memory enforcement adapter with failure injection.

use crate::application::ports::{AdapterError, EnforcementAdapter};
use crate::domain::sanction::EnforcementAction;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Keeps the set of enforced actions in memory.
///
/// Like a real binding it is idempotent: applying an enforced action or
/// reverting one that is not enforced succeeds without changing anything.
/// `effects()` counts only calls that changed the set.
#[derive(Debug, Default)]
pub struct RecordingAdapter {
    enforced: Mutex<BTreeSet<EnforcementAction>>,
    apply_calls: AtomicU64,
    revert_calls: AtomicU64,
    effects: AtomicU64,
    failing: AtomicBool,
    fail_next: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `actions` already enforced, as after a crash.
    pub fn with_enforced(actions: impl IntoIterator<Item = EnforcementAction>) -> Self {
        let adapter = Self::new();
        adapter.enforced.lock().expect("adapter mutex poisoned").extend(actions);
        adapter
    }

    pub fn is_blocked(&self, action: &EnforcementAction) -> bool {
        self.enforced.lock().expect("adapter mutex poisoned").contains(action)
    }

    pub fn enforced(&self) -> BTreeSet<EnforcementAction> {
        self.enforced.lock().expect("adapter mutex poisoned").clone()
    }

    pub fn apply_calls(&self) -> u64 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn revert_calls(&self) -> u64 {
        self.revert_calls.load(Ordering::SeqCst)
    }

    pub fn effects(&self) -> u64 {
        self.effects.load(Ordering::SeqCst)
    }

    /// Fail every call until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `n` calls.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("adapter mutex poisoned") = Some(delay);
    }

    async fn before_call(&self) -> Result<(), AdapterError> {
        let delay = *self.delay.lock().expect("adapter mutex poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdapterError::Failed("injected failure".into()));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(AdapterError::Failed("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EnforcementAdapter for RecordingAdapter {
    async fn apply(&self, action: &EnforcementAction) -> Result<(), AdapterError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        if self.enforced.lock().expect("adapter mutex poisoned").insert(action.clone()) {
            self.effects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn revert(&self, action: &EnforcementAction) -> Result<(), AdapterError> {
        self.revert_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        if self.enforced.lock().expect("adapter mutex poisoned").remove(action) {
            self.effects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idempotent_apply_and_revert() {
        let adapter = RecordingAdapter::new();
        let action = EnforcementAction::account_lock("alice");

        adapter.apply(&action).await.unwrap();
        adapter.apply(&action).await.unwrap();
        assert_eq!(adapter.effects(), 1);

        adapter.revert(&action).await.unwrap();
        adapter.revert(&action).await.unwrap();
        assert_eq!(adapter.effects(), 2);
        assert!(!adapter.is_blocked(&action));
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed() {
        let adapter = RecordingAdapter::new();
        let action = EnforcementAction::account_lock("bob");
        adapter.fail_next(1);

        assert!(adapter.apply(&action).await.is_err());
        assert!(adapter.apply(&action).await.is_ok());
        assert_eq!(adapter.apply_calls(), 2);
    }
}
