//! Metric and consumption-source interfaces.
//!
//! The tracker publishes its observable state through these; concrete
//! registries live downstream (a simple in-memory one ships with
//! `memtally-track` for tests and embedding). Keeping only traits here means
//! the accounting tree never depends on a particular telemetry stack.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A single signed metric cell. Write-only from the tracker's perspective;
/// scrapers read it with [`Gauge::value`].
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A registry the tracker can publish gauges into.
///
/// Registering the same name twice must hand back the same cell.
pub trait MetricsRegistry: Send + Sync {
    fn gauge(&self, name: &str) -> Arc<Gauge>;
}

/// An external measure of consumed bytes, e.g. an allocator statistic.
///
/// A tracker built on one of these reports the sampled value instead of its
/// own ledger. This accommodates allocators that retain freed memory, where
/// the process footprint exceeds the sum of live charges.
pub trait ConsumptionSource: Send + Sync {
    fn consumed_bytes(&self) -> i64;
}
