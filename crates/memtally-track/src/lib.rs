#![forbid(unsafe_code)]
//! memtally-track: the accounting tree itself.
//!
//! This crate provides concrete implementations for the *interfaces* defined
//! in `memtally-core`. Trackers form a forest; every byte charged to a leaf is
//! charged to all of its ancestors, limits are enforced per node, and
//! reclamation callbacks run when a limited node is pressed.
//!
//! Charging is lock-free. Locks exist only around the per-tracker GC pass,
//! the children list, and the query registry map.

pub mod counter;
pub mod metrics;
pub mod registry;
pub mod report;
pub mod tracker;

pub use counter::{HighWaterCounter, COUNTER_NAME};
pub use metrics::InMemoryMetrics;
pub use registry::TrackerRegistry;
pub use tracker::{GcFn, MemTracker};
