//! Scheduled sweep: scan the event log, enforce, reconcile.
//!
//! One sweep runs at a time. Ticks that fall due while a sweep is still
//! running are skipped rather than queued, and cancellation is only observed
//! between sweeps so an in-flight adapter call is never abandoned.

use crate::application::aggregator::{ScanReport, WindowAggregator};
use crate::application::engine::{Activation, EnforcementEngine, ReconcileReport, RecoveryReport};
use crate::application::limiter::TieredRateLimiter;
use crate::application::ports::{Clock, EventSource, StoreError};
use crate::domain::time::MAX_DURATION;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Error returned when sweeper configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweeperConfigError {
    ZeroSweepInterval,
    ZeroReversalInterval,
    /// An interval is longer than `MAX_DURATION`
    IntervalTooLarge(Duration),
}

impl std::fmt::Display for SweeperConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweeperConfigError::ZeroSweepInterval => write!(f, "sweep interval must be greater than 0"),
            SweeperConfigError::ZeroReversalInterval => {
                write!(f, "reversal interval must be greater than 0")
            }
            SweeperConfigError::IntervalTooLarge(d) => {
                write!(f, "interval {:?} exceeds the maximum of {:?}", d, MAX_DURATION)
            }
        }
    }
}

impl std::error::Error for SweeperConfigError {}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between full sweeps
    pub sweep_interval: Duration,
    /// Optional faster schedule that only reconciles expired sanctions
    pub reversal_interval: Option<Duration>,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            reversal_interval: None,
        }
    }
}

impl SweeperConfig {
    /// # Errors
    /// Returns `SweeperConfigError::ZeroSweepInterval` if `sweep_interval` is zero.
    pub fn new(sweep_interval: Duration) -> Result<Self, SweeperConfigError> {
        if sweep_interval.is_zero() {
            return Err(SweeperConfigError::ZeroSweepInterval);
        }
        if sweep_interval > MAX_DURATION {
            return Err(SweeperConfigError::IntervalTooLarge(sweep_interval));
        }
        Ok(Self {
            sweep_interval,
            reversal_interval: None,
        })
    }

    pub fn with_reversal_interval(mut self, every: Duration) -> Result<Self, SweeperConfigError> {
        if every.is_zero() {
            return Err(SweeperConfigError::ZeroReversalInterval);
        }
        if every > MAX_DURATION {
            return Err(SweeperConfigError::IntervalTooLarge(every));
        }
        self.reversal_interval = Some(every);
        Ok(self)
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `None` when the event log could not be read; enforcement still ran
    pub scan: Option<ScanReport>,
    pub applied: usize,
    pub already_active: usize,
    pub deferred: usize,
    /// Pending actions that went through on retry
    pub retried: usize,
    pub reconciled: ReconcileReport,
}

/// Drives aggregation and enforcement on a schedule.
#[derive(Debug)]
pub struct Sweeper {
    aggregator: WindowAggregator,
    engine: Arc<EnforcementEngine>,
    source: Arc<dyn EventSource>,
    clock: Arc<dyn Clock>,
    limiter: Option<TieredRateLimiter>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(
        aggregator: WindowAggregator,
        engine: Arc<EnforcementEngine>,
        source: Arc<dyn EventSource>,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            aggregator,
            engine,
            source,
            clock,
            limiter: None,
            config,
        }
    }

    /// Also drop idle limiter state on every sweep.
    pub fn with_limiter(mut self, limiter: TieredRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn engine(&self) -> &Arc<EnforcementEngine> {
        &self.engine
    }

    /// Run one full sweep at the clock's current time.
    pub async fn sweep_once(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        self.engine.flush_if_dirty();
        report.retried = self.engine.retry_pending(now).await;

        let window = self.aggregator.config().window;
        let threshold = self.aggregator.config().abuse_threshold;
        let aggregator = self.aggregator.clone();
        let source = Arc::clone(&self.source);
        let scan = tokio::task::spawn_blocking(move || aggregator.scan(source.as_ref(), window, now)).await;

        match scan {
            Ok(Ok(scan)) => {
                for flag in &scan.flags {
                    let reason = flag.describe(window, threshold);
                    for (_, activation) in self.engine.handle_flag(flag, &reason, now).await {
                        match activation {
                            Activation::Applied => report.applied += 1,
                            Activation::AlreadyActive => report.already_active += 1,
                            Activation::Deferred(_) => report.deferred += 1,
                        }
                    }
                }
                report.scan = Some(scan);
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "event log unreadable; skipping scan this sweep"),
            Err(e) => tracing::error!(error = %e, "event log scan task failed"),
        }

        report.reconciled = self.engine.reconcile(now).await;

        if let Some(limiter) = &self.limiter {
            limiter.cleanup(now);
        }

        self.engine.metrics().record_sweep();
        tracing::debug!(
            applied = report.applied,
            deferred = report.deferred,
            retried = report.retried,
            reverted = report.reconciled.reverted,
            "sweep finished"
        );
        report
    }

    /// Only revert expired sanctions.
    pub async fn reconcile_once(&self) -> ReconcileReport {
        self.engine.reconcile(self.clock.now()).await
    }

    /// Recover persisted sanctions, then start the schedule.
    ///
    /// Overdue sanctions are reverted before this returns, so before any
    /// sweep runs.
    ///
    /// # Errors
    /// Returns the store error if persisted sanctions cannot be loaded.
    pub async fn start(self) -> Result<(SweeperHandle, RecoveryReport), StoreError> {
        let recovery = self.engine.recover(self.clock.now()).await?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });

        Ok((SweeperHandle { cancel, task }, recovery))
    }

    async fn run(self, cancel: CancellationToken) {
        let mut sweep_tick = interval(self.config.sweep_interval);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reversal_tick = self.config.reversal_interval.map(|every| {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick
        });

        tracing::info!(
            sweep_secs = self.config.sweep_interval.as_secs(),
            window_secs = self.aggregator.config().window.as_secs(),
            threshold = self.aggregator.config().abuse_threshold,
            "sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sweep_tick.tick() => {
                    self.sweep_once().await;
                }
                _ = next_tick(&mut reversal_tick) => {
                    self.reconcile_once().await;
                }
            }
        }

        tracing::info!("sweeper stopped");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Error returned by [`SweeperHandle::shutdown`].
#[derive(Debug)]
pub enum ShutdownError {
    /// The in-flight sweep did not finish in time and was aborted
    GraceExpired(Duration),
    TaskPanicked,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::GraceExpired(d) => {
                write!(f, "sweeper did not stop within {:?}; aborted", d)
            }
            ShutdownError::TaskPanicked => write!(f, "sweeper task panicked"),
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop scheduling sweeps and wait up to `grace` for the current one.
    pub async fn shutdown(self, grace: Duration) -> Result<(), ShutdownError> {
        self.cancel.cancel();
        let abort = self.task.abort_handle();
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_panic() => Err(ShutdownError::TaskPanicked),
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                abort.abort();
                tracing::warn!(grace_ms = grace.as_millis() as u64, "sweeper shutdown grace expired");
                Err(ShutdownError::GraceExpired(grace))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
