//! # quota-guard
//!
//! Tiered request quotas and log-driven abuse enforcement for a multi-tenant
//! API.
//!
//! Two independent layers:
//!
//! 1. **Request path.** [`AbuseGuard`] resolves the caller's token to a
//!    [`Principal`], rejects callers under an active sanction, and runs the
//!    [`TieredRateLimiter`]: a per-principal fixed window with a per-tier
//!    request cap and minimum spacing. Every decision is appended to the
//!    event log.
//! 2. **Sweep path.** A [`Sweeper`] periodically scans the event log with the
//!    [`WindowAggregator`], flags principals above the abuse threshold, and
//!    hands them to the [`EnforcementEngine`]. The engine applies network
//!    blocks or account locks through an [`EnforcementAdapter`], persists
//!    each sanction with an expiry, and reverts it once it has expired.
//!
//! The two layers use separate thresholds and do not coordinate; a principal
//! can be both limited and sanctioned.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quota_guard::{
//!     AbuseGuard, Admission, ApiRequest, Outcome, Principal, StaticDirectory, Tier,
//! };
//! use std::sync::Arc;
//!
//! let directory = StaticDirectory::new([Principal::new("tok-123", Tier::Free, "alice")]);
//! let guard = AbuseGuard::builder()
//!     .with_directory(Arc::new(directory))
//!     .build()
//!     .unwrap();
//!
//! let request = ApiRequest::new("tok-123", "10.0.0.7".parse().unwrap(), "/api/flights");
//! match guard.admit(request) {
//!     Admission::Allowed(admitted) => {
//!         // ... serve the request ...
//!         guard.record(admitted, Outcome::Success);
//!     }
//!     Admission::Rejected(rejection) => {
//!         println!("{}", serde_json::to_string(&rejection).unwrap());
//!     }
//! }
//! ```
//!
//! ## Sanction lifecycle
//!
//! ```text
//! None --flag, apply ok--> Active --now >= expires_at--> Expired --revert ok--> (deleted)
//!   ^   flag, apply failed: pending, retried next sweep      |  revert failed: kept, retried
//! ```
//!
//! Re-flagging an active sanction never changes its expiry. Records survive
//! restarts through the [`SanctionStore`]; overdue ones are reverted by
//! [`Sweeper::start`] before the first sweep.
//!
//! ## Features
//!
//! - `test-helpers`: exposes [`infrastructure::mocks`] (mock clock, recording
//!   adapter, in-memory stores, tracing capture layer) to integration tests.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

pub use domain::{
    event::{Outcome, ParseError, RequestEvent},
    principal::{Principal, Tier, UnknownTier},
    quota::{FixedWindow, PolicyError, QuotaDecision, QuotaPolicy, QuotaTable, RejectReason},
    sanction::{AbuseFlag, ActionKind, EnforcementAction, SanctionRecord, SanctionState},
};

pub use application::{
    aggregator::{AggregatorConfig, AggregatorConfigError, ScanReport, WindowAggregator},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    engine::{
        Activation, EnforcementEngine, EngineConfig, EngineConfigError, ReconcileReport,
        RecoveryReport,
    },
    guard::{AbuseGuard, AbuseGuardBuilder, Admission, Admitted, ApiRequest, BuildError},
    limiter::{LimitDecision, Rejection, TieredRateLimiter},
    metrics::{Metrics, MetricsSnapshot},
    ports::{
        AdapterError, Clock, DirectoryError, EnforcementAdapter, EnforcementJournal, EventSink,
        EventSource, JournalKind, PrincipalDirectory, SanctionLookup, SanctionStore, Storage,
        StoreError,
    },
    sweeper::{ShutdownError, SweepReport, Sweeper, SweeperConfig, SweeperConfigError, SweeperHandle},
};

pub use infrastructure::{
    adapters::{CommandAdapter, CommandSet, NoopAdapter},
    clock::SystemClock,
    config::{ConfigError, GuardConfig},
    directory::{JsonDirectory, StaticDirectory},
    event_log::FileEventLog,
    journal::FileJournal,
    sanction_store::{JsonFileStore, StoredSanctions},
    storage::ShardedStorage,
};
