//! Conversions between `std::time::Duration` and chrono's signed deltas.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Timestamp layout shared by the event log and the enforcement journal.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Longest window, spacing or sanction duration accepted by any config.
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Convert to a signed delta, saturating at `TimeDelta::MAX`.
pub fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Convert to an unsigned duration; negative deltas become zero.
pub fn to_std(delta: TimeDelta) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

/// `at + duration`, pinned to the latest representable instant on overflow.
pub fn saturating_add(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_add_signed(to_delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - duration`, pinned to the earliest representable instant on overflow.
pub fn saturating_sub(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(to_delta(duration))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
