//! Circuit breaker in front of the enforcement adapter.
//!
//! After `failure_threshold` consecutive adapter failures the circuit opens
//! and adapter calls are refused until `cooldown` has elapsed. The first call
//! after the cooldown is a half-open probe: success closes the circuit,
//! failure reopens it for another cooldown. Refused calls are reported to the
//! engine as `AdapterError::CircuitOpen` and retried on a later sweep.
//!
//! The cooldown is measured on tokio's clock, so it follows paused time.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Adapter calls go through
    Closed = 0,
    /// Adapter calls are refused
    Open = 1,
    /// One probe call is allowed through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit refuses calls
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    opened_at_nanos: AtomicU64,
    config: CircuitBreakerConfig,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            opened_at_nanos: AtomicU64::new(0),
            config,
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether an adapter call may be attempted now.
    pub fn permit(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.elapsed_since_open() < self.config.cooldown {
                    return false;
                }
                // Only one caller wins the Open -> HalfOpen transition.
                self.state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            }
        }
    }

    pub fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
    }

    pub fn on_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let reopen = match self.state() {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= u64::from(self.config.failure_threshold),
            CircuitState::Open => false,
        };
        if reopen {
            let nanos = self.epoch.elapsed().as_nanos().try_into().unwrap_or(u64::MAX);
            self.opened_at_nanos.store(nanos, Ordering::Release);
            self.state.store(CircuitState::Open as u8, Ordering::Release);
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    fn elapsed_since_open(&self) -> Duration {
        let opened_at = Duration::from_nanos(self.opened_at_nanos.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(opened_at)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
