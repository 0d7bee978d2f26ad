//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Sharded in-memory limiter storage
//! - Event log, sanction store, journal and account store files
//! - Enforcement bindings (external commands, dry run)
//! - Service configuration

pub mod adapters;
pub mod clock;
pub mod config;
pub mod directory;
pub mod event_log;
pub mod journal;
pub mod sanction_store;
pub mod storage;

/// Mock implementations for testing.
///
/// Only available when the `test-helpers` feature is enabled, or during
/// test builds. To use these mocks in integration tests:
/// ```toml
/// [dev-dependencies]
/// quota-guard = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
