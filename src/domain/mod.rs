//! Domain layer - pure types and rules with no I/O.
//!
//! - Principals and tiers
//! - Quota policies and the fixed-window counter
//! - Request events and the log line format
//! - Sanctions, abuse flags and their lifecycle

pub mod event;
pub mod principal;
pub mod quota;
pub mod sanction;
pub mod time;
