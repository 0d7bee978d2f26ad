//! Window aggregation over the event log.
//!
//! A scan reads one stable snapshot of the log, counts requests per principal
//! inside `[now - window, now]` and flags every principal whose count exceeds
//! the abuse threshold. Malformed lines are skipped and counted.

use crate::application::metrics::Metrics;
use crate::application::ports::EventSource;
use crate::domain::event::{Outcome, ParseError, RequestEvent};
use crate::domain::sanction::AbuseFlag;
use crate::domain::time::{saturating_sub, MAX_DURATION};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::IpAddr;
use std::time::Duration;

/// Error returned when aggregator configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorConfigError {
    /// Window duration must be greater than zero
    ZeroWindow,
    /// Window is longer than `MAX_DURATION`
    WindowTooLarge(Duration),
}

impl std::fmt::Display for AggregatorConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregatorConfigError::ZeroWindow => write!(f, "aggregation window must be greater than 0"),
            AggregatorConfigError::WindowTooLarge(d) => {
                write!(f, "aggregation window {:?} exceeds the maximum of {:?}", d, MAX_DURATION)
            }
        }
    }
}

impl std::error::Error for AggregatorConfigError {}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Trailing window requests are counted over
    pub window: Duration,
    /// A principal is flagged when its count strictly exceeds this
    pub abuse_threshold: usize,
    /// Outcomes that count towards the threshold; `None` counts every outcome
    pub counted_outcomes: Option<BTreeSet<Outcome>>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            abuse_threshold: 100,
            counted_outcomes: None,
        }
    }
}

impl AggregatorConfig {
    /// # Errors
    /// Returns `AggregatorConfigError::ZeroWindow` if `window` is zero and
    /// `AggregatorConfigError::WindowTooLarge` if it exceeds `MAX_DURATION`.
    pub fn new(window: Duration, abuse_threshold: usize) -> Result<Self, AggregatorConfigError> {
        if window.is_zero() {
            return Err(AggregatorConfigError::ZeroWindow);
        }
        if window > MAX_DURATION {
            return Err(AggregatorConfigError::WindowTooLarge(window));
        }
        Ok(Self {
            window,
            abuse_threshold,
            counted_outcomes: None,
        })
    }

    /// Only count events with one of `outcomes`.
    pub fn with_counted_outcomes(mut self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.counted_outcomes = Some(outcomes.into_iter().collect());
        self
    }

    fn counts(&self, outcome: Outcome) -> bool {
        self.counted_outcomes
            .as_ref()
            .map_or(true, |set| set.contains(&outcome))
    }
}

/// Result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub flags: BTreeSet<AbuseFlag>,
    /// Non-blank lines examined
    pub lines_read: usize,
    /// Parsed events that fell inside the window and were counted
    pub events_in_window: usize,
    pub parse_errors: usize,
}

#[derive(Default)]
struct Tally {
    count: usize,
    addresses: BTreeSet<IpAddr>,
}

/// Stateless scanner; every scan works from its own snapshot.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    config: AggregatorConfig,
    metrics: Metrics,
}

impl WindowAggregator {
    pub fn new(config: AggregatorConfig, metrics: Metrics) -> Self {
        Self { config, metrics }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Snapshot `source` and scan it.
    pub fn scan(
        &self,
        source: &dyn EventSource,
        window: Duration,
        now: DateTime<Utc>,
    ) -> io::Result<ScanReport> {
        let text = source.snapshot()?;
        Ok(self.scan_text(&text, window, now))
    }

    /// Scan already-read log text.
    pub fn scan_text(&self, text: &str, window: Duration, now: DateTime<Utc>) -> ScanReport {
        let since = saturating_sub(now, window);
        let mut report = ScanReport::default();
        let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            report.lines_read += 1;
            let event = match RequestEvent::parse_line(line) {
                Ok(event) => event,
                Err(ParseError::NotARequest) => {
                    // Other log traffic sharing the file.
                    continue;
                }
                Err(e) => {
                    report.parse_errors += 1;
                    tracing::debug!(error = %e, "skipping malformed event log line");
                    continue;
                }
            };

            if event.timestamp < since || event.timestamp > now || !self.config.counts(event.outcome)
            {
                continue;
            }

            report.events_in_window += 1;
            let tally = tallies.entry(event.principal_id).or_default();
            tally.count += 1;
            tally.addresses.insert(event.source_address);
        }

        report.flags = tallies
            .into_iter()
            .filter(|(_, tally)| tally.count > self.config.abuse_threshold)
            .map(|(principal_id, tally)| AbuseFlag {
                principal_id,
                window_count: tally.count,
                detected_at: now,
                source_addresses: tally.addresses,
            })
            .collect();

        if report.parse_errors > 0 {
            tracing::warn!(
                parse_errors = report.parse_errors,
                lines = report.lines_read,
                "event log contained malformed lines"
            );
            self.metrics.add_parse_errors(report.parse_errors as u64);
        }
        self.metrics.add_flags(report.flags.len() as u64);
        for flag in &report.flags {
            tracing::info!(
                principal = %flag.principal_id,
                count = flag.window_count,
                threshold = self.config.abuse_threshold,
                window_secs = window.as_secs(),
                "principal exceeded abuse threshold"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn line(secs_ago: i64, token: &str, ip: &str, status: &str) -> String {
        let ts = now() - TimeDelta::seconds(secs_ago);
        format!(
            "{} [API_REQUEST] token={} status={} ip={} endpoint=/api/flights params={{}}",
            ts.format("%Y-%m-%d %H:%M:%S"),
            token,
            status,
            ip
        )
    }

    fn aggregator(threshold: usize) -> WindowAggregator {
        WindowAggregator::new(
            AggregatorConfig::new(Duration::from_secs(60), threshold).unwrap(),
            Metrics::new(),
        )
    }

    #[test]
    fn test_flags_only_above_threshold() {
        let mut log = Vec::new();
        for i in 0..4 {
            log.push(line(i, "heavy", "10.0.0.1", "SUCCESS"));
        }
        for i in 0..3 {
            log.push(line(i, "edge", "10.0.0.2", "SUCCESS"));
        }

        let report = aggregator(3).scan_text(&log.join("\n"), Duration::from_secs(60), now());

        assert_eq!(report.flags.len(), 1);
        let flag = report.flags.iter().next().unwrap();
        assert_eq!(flag.principal_id, "heavy");
        assert_eq!(flag.window_count, 4);
        assert_eq!(flag.detected_at, now());
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let log = [
            line(60, "a", "10.0.0.1", "SUCCESS"),
            line(0, "a", "10.0.0.1", "SUCCESS"),
            line(61, "a", "10.0.0.1", "SUCCESS"),
            line(-1, "a", "10.0.0.1", "SUCCESS"),
        ]
        .join("\n");

        let report = aggregator(1).scan_text(&log, Duration::from_secs(60), now());
        assert_eq!(report.events_in_window, 2);
        assert_eq!(report.flags.iter().next().unwrap().window_count, 2);
    }

    #[test]
    fn test_malformed_lines_are_counted_not_fatal() {
        let log = [
            line(1, "a", "10.0.0.1", "SUCCESS"),
            "2025-03-01 11:59:59 [API_REQUEST] token=a status=BOGUS ip=10.0.0.1 endpoint=/x params={}"
                .to_string(),
            "garbage [API_REQUEST] token=a".to_string(),
            "2025-03-01 11:59:59 [INFO] server started".to_string(),
            String::new(),
            line(2, "a", "10.0.0.1", "SUCCESS"),
        ]
        .join("\n");

        let agg = aggregator(1);
        let report = agg.scan_text(&log, Duration::from_secs(60), now());

        assert_eq!(report.parse_errors, 2);
        assert_eq!(report.lines_read, 5);
        assert_eq!(report.flags.len(), 1);
        assert_eq!(agg.metrics.parse_errors(), 2);
    }

    #[test]
    fn test_collects_source_addresses() {
        let log = [
            line(1, "a", "10.0.0.1", "SUCCESS"),
            line(2, "a", "10.0.0.2", "ERROR"),
            line(3, "a", "10.0.0.1", "RATE_LIMITED"),
        ]
        .join("\n");

        let report = aggregator(2).scan_text(&log, Duration::from_secs(60), now());
        let flag = report.flags.iter().next().unwrap();
        let addrs: Vec<String> = flag.source_addresses.iter().map(|a| a.to_string()).collect();
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_counted_outcomes_filter() {
        let log = [
            line(1, "a", "10.0.0.1", "SUCCESS"),
            line(2, "a", "10.0.0.1", "RATE_LIMITED"),
            line(3, "a", "10.0.0.1", "RATE_LIMITED"),
        ]
        .join("\n");

        let config = AggregatorConfig::new(Duration::from_secs(60), 1)
            .unwrap()
            .with_counted_outcomes([Outcome::Success, Outcome::Error]);
        let report = WindowAggregator::new(config, Metrics::new()).scan_text(
            &log,
            Duration::from_secs(60),
            now(),
        );
        assert!(report.flags.is_empty());
        assert_eq!(report.events_in_window, 1);
    }

    #[test]
    fn test_repeated_scans_are_identical() {
        let log: Vec<String> = (0..50)
            .map(|i| line(i % 70, if i % 3 == 0 { "x" } else { "y" }, "10.0.0.9", "SUCCESS"))
            .collect();
        let log = log.join("\n");
        let agg = aggregator(10);

        let first = agg.scan_text(&log, Duration::from_secs(60), now());
        let second = agg.scan_text(&log, Duration::from_secs(60), now());
        assert_eq!(first, second);
    }

    #[test]
    fn test_unbounded_scan_window_does_not_panic() {
        let log = line(5, "a", "10.0.0.1", "SUCCESS");
        let report = aggregator(0).scan_text(&log, Duration::MAX, now());
        assert_eq!(report.events_in_window, 1);
    }

    #[test]
    fn test_oversized_window_rejected() {
        let huge = Duration::from_secs(i64::MAX as u64);
        assert_eq!(
            AggregatorConfig::new(huge, 10).unwrap_err(),
            AggregatorConfigError::WindowTooLarge(huge)
        );
    }

    #[test]
    fn test_zero_window_rejected() {
        assert_eq!(
            AggregatorConfig::new(Duration::ZERO, 10).unwrap_err(),
            AggregatorConfigError::ZeroWindow
        );
    }
}
