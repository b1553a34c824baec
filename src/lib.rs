//! memtally: hierarchical memory accounting for analytical query execution.
//!
//! Facade crate that re-exports the public surface of the workspace members.
//! Embedders that only need the interfaces (for mocking or alternate
//! implementations) can depend on `memtally-core` directly.

pub use memtally_core::config::AccountingConfig;
pub use memtally_core::error::{Error, Result};
pub use memtally_core::id::QueryId;
pub use memtally_core::metrics::{ConsumptionSource, Gauge, MetricsRegistry};

pub use memtally_track::counter::{HighWaterCounter, COUNTER_NAME};
pub use memtally_track::metrics::InMemoryMetrics;
pub use memtally_track::registry::TrackerRegistry;
pub use memtally_track::tracker::{GcFn, MemTracker};
