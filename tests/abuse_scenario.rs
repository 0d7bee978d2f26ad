//! End-to-end: requests through the guard, detection by the sweeper, then
//! enforcement feeding back into admission.

use chrono::{DateTime, TimeZone, Utc};
use quota_guard::infrastructure::mocks::{MemoryJournal, MemoryStore, MockClock, RecordingAdapter};
use quota_guard::{
    AbuseGuard, Admission, AggregatorConfig, ApiRequest, EnforcementAction, EnforcementEngine,
    EngineConfig, FileEventLog, Metrics, Outcome, Principal, QuotaPolicy, QuotaTable, RejectReason,
    StaticDirectory, Sweeper, SweeperConfig, Tier, WindowAggregator,
};
use std::sync::Arc;
use std::time::Duration;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

struct Stack {
    guard: AbuseGuard,
    sweeper: Sweeper,
    clock: MockClock,
    adapter: Arc<RecordingAdapter>,
    _dir: tempfile::TempDir,
}

fn stack(quotas: QuotaTable) -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(FileEventLog::new(dir.path().join("api.log")));
    let clock = MockClock::new(t0());
    let adapter = Arc::new(RecordingAdapter::new());
    let metrics = Metrics::new();
    let directory = Arc::new(StaticDirectory::new([
        Principal::new("tok-pro", Tier::Pro, "acme"),
        Principal::new("tok-free", Tier::Free, "bob"),
        Principal::new("tok-quiet", Tier::Free, "carol"),
    ]));

    let engine = Arc::new(
        EnforcementEngine::new(
            EngineConfig::default(),
            adapter.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryJournal::new()),
            metrics.clone(),
        )
        .with_directory(directory.clone()),
    );

    let guard = AbuseGuard::builder()
        .with_quotas(quotas)
        .with_directory(directory)
        .with_event_sink(log.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_sanctions(engine.clone())
        .with_metrics(metrics.clone())
        .build()
        .unwrap();

    let sweeper = Sweeper::new(
        WindowAggregator::new(
            AggregatorConfig::new(Duration::from_secs(60), 100).unwrap(),
            metrics,
        ),
        engine,
        log,
        Arc::new(clock.clone()),
        SweeperConfig::new(Duration::from_secs(30)).unwrap(),
    )
    .with_limiter(guard.limiter().clone());

    Stack {
        guard,
        sweeper,
        clock,
        adapter,
        _dir: dir,
    }
}

fn request(token: &str, ip: &str) -> ApiRequest {
    ApiRequest::new(token, ip.parse().unwrap(), "/api/flights").with_params("{\"from\":\"TPE\"}")
}

/// Send `n` requests spaced `every` apart, recording admitted ones as successes.
fn drive(stack: &Stack, token: &str, ip: &str, n: usize, every: Duration) -> usize {
    let mut admitted = 0;
    for _ in 0..n {
        if let Admission::Allowed(a) = stack.guard.admit(request(token, ip)) {
            stack.guard.record(a, Outcome::Success);
            admitted += 1;
        }
        stack.clock.advance(every);
    }
    admitted
}

fn generous_pro() -> QuotaTable {
    QuotaTable::new([
        (Tier::Free, QuotaPolicy::default_for(Tier::Free)),
        (Tier::Plus, QuotaPolicy::default_for(Tier::Plus)),
        (
            Tier::Pro,
            QuotaPolicy::new(200, Duration::from_secs(60), Duration::from_millis(200)).unwrap(),
        ),
    ])
    .unwrap()
}

#[tokio::test]
async fn test_sustained_burst_gets_source_blocked() {
    let s = stack(generous_pro());
    let admitted = drive(&s, "tok-pro", "203.0.113.7", 150, Duration::from_millis(400));
    assert_eq!(admitted, 150);

    let report = s.sweeper.sweep_once().await;
    let scan = report.scan.unwrap();
    assert_eq!(scan.flags.len(), 1);
    assert_eq!(scan.flags.iter().next().unwrap().window_count, 150);
    assert_eq!(report.applied, 1);

    let block = EnforcementAction::network_block("203.0.113.7".parse().unwrap());
    assert!(s.adapter.is_blocked(&block));

    let next = s.guard.admit(request("tok-pro", "203.0.113.7"));
    let rejection = next.rejection().unwrap();
    assert_eq!(rejection.reason, RejectReason::Sanctioned);
    assert!(rejection.retry_after.unwrap() > Duration::from_secs(590));

    // Another caller from a clean address is unaffected.
    assert!(s.guard.admit(request("tok-quiet", "198.51.100.2")).is_allowed());
}

#[tokio::test]
async fn test_rate_limited_traffic_still_counts_towards_abuse() {
    let s = stack(QuotaTable::default());
    let admitted = drive(&s, "tok-free", "203.0.113.9", 150, Duration::from_millis(300));

    // Free tier spacing lets roughly one request in every six seconds through.
    assert!(admitted < 15);
    assert_eq!(s.guard.metrics().snapshot().requests_rejected(), (150 - admitted) as u64);

    let report = s.sweeper.sweep_once().await;
    assert_eq!(report.applied, 1);
    assert!(s.adapter.is_blocked(&EnforcementAction::network_block("203.0.113.9".parse().unwrap())));
}

#[tokio::test]
async fn test_block_lifts_after_duration() {
    let s = stack(generous_pro());
    drive(&s, "tok-pro", "203.0.113.7", 150, Duration::from_millis(400));
    s.sweeper.sweep_once().await;
    assert!(!s.guard.admit(request("tok-pro", "203.0.113.7")).is_allowed());

    s.clock.advance(Duration::from_secs(600));
    let report = s.sweeper.sweep_once().await;
    assert_eq!(report.reconciled.reverted, 1);
    assert!(s.adapter.enforced().is_empty());
    assert!(s.guard.admit(request("tok-pro", "203.0.113.7")).is_allowed());
}

#[tokio::test]
async fn test_below_threshold_is_left_alone() {
    let s = stack(generous_pro());
    drive(&s, "tok-pro", "203.0.113.7", 100, Duration::from_millis(400));

    let report = s.sweeper.sweep_once().await;
    assert!(report.scan.unwrap().flags.is_empty());
    assert!(s.adapter.enforced().is_empty());
}
