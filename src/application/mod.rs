//! Application layer - orchestration of domain logic.
//!
//! Two paths run here:
//! - the request path: [`guard::AbuseGuard`] in front of the tiered limiter
//! - the sweep path: [`sweeper::Sweeper`] driving the window aggregator and
//!   the enforcement engine
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters implement, so nothing here touches files, processes or the
//! system clock directly.

pub mod aggregator;
pub mod circuit_breaker;
pub mod engine;
pub mod guard;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod sweeper;
