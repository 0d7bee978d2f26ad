//! Test doubles for the ports.
//!
//! Available in test builds and with the `test-helpers` feature.

pub mod adapter;
pub mod clock;
pub mod layer;
pub mod memory;

pub use adapter::RecordingAdapter;
pub use clock::MockClock;
pub use layer::MockCaptureLayer;
pub use memory::{MemoryEventLog, MemoryJournal, MemoryStore};
