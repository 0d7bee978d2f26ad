//! Wall clock adapter.
//!
//! See `MockClock` in `crate::infrastructure::mocks` for a controllable clock.

use crate::application::ports::Clock;
use chrono::{DateTime, Utc};

/// Reads the system wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
