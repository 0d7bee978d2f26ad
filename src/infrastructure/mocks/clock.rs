//! Controllable wall clock.

use crate::application::ports::Clock;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock whose time only moves when a test moves it.
///
/// Clones share the same time.
///
/// ```
/// use quota_guard::infrastructure::mocks::MockClock;
/// use quota_guard::application::ports::Clock;
/// use chrono::{TimeZone, Utc};
/// use std::time::Duration;
///
/// let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
/// let clock = MockClock::new(start);
/// clock.advance(Duration::from_secs(90));
/// assert_eq!(clock.now(), Utc.with_ymd_and_hms(2025, 3, 1, 12, 1, 30).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.current.lock().expect("MockClock mutex poisoned");
        *now += crate::domain::time::to_delta(by);
    }

    /// Move the clock back, simulating a wall-clock correction.
    pub fn rewind(&self, by: Duration) {
        let mut now = self.current.lock().expect("MockClock mutex poisoned");
        *now -= crate::domain::time::to_delta(by);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock().expect("MockClock mutex poisoned") = at;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().expect("MockClock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_shared_between_clones() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let clock = MockClock::new(start);
        let other = clock.clone();

        other.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), start + chrono::TimeDelta::seconds(10));

        clock.rewind(Duration::from_secs(20));
        assert_eq!(other.now(), start - chrono::TimeDelta::seconds(10));
    }
}
