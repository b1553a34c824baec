//! Metric bindings for trackers, plus a simple in-memory registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use memtally_core::error::{Error, Result};
use memtally_core::metrics::{Gauge, MetricsRegistry};

use crate::tracker::MemTracker;

/// Gauges a tracker publishes into once bound. Write-only from the tracker's
/// perspective; the registry owns the read side.
pub(crate) struct TrackerMetrics {
    pub(crate) consumption: Arc<Gauge>,
    pub(crate) peak_consumption: Arc<Gauge>,
    pub(crate) limit: Arc<Gauge>,
    /// Number of GC passes run on this tracker.
    pub(crate) num_gcs: Arc<Gauge>,
    /// Bytes reclaimed by the most recent GC pass; -1 before any pass.
    pub(crate) bytes_freed_by_last_gc: Arc<Gauge>,
    /// Bytes over the limit the last time it was found exceeded; -1 if never.
    pub(crate) bytes_over_limit: Arc<Gauge>,
}

impl MemTracker {
    /// Publish this tracker's state under `<prefix>.<field>` names. After
    /// registration the gauges follow the tracker as side effects of the
    /// accounting operations. Binding the same tracker twice is an error.
    pub fn register_metrics(&self, registry: &dyn MetricsRegistry, prefix: &str) -> Result<()> {
        let bindings = TrackerMetrics {
            consumption: registry.gauge(&format!("{}.consumption", prefix)),
            peak_consumption: registry.gauge(&format!("{}.peak-consumption", prefix)),
            limit: registry.gauge(&format!("{}.limit", prefix)),
            num_gcs: registry.gauge(&format!("{}.num-gcs", prefix)),
            bytes_freed_by_last_gc: registry.gauge(&format!("{}.bytes-freed-by-last-gc", prefix)),
            bytes_over_limit: registry.gauge(&format!("{}.bytes-over-limit", prefix)),
        };
        bindings.limit.set(self.limit());
        bindings.bytes_freed_by_last_gc.set(-1);
        bindings.bytes_over_limit.set(-1);

        self.metrics
            .set(bindings)
            .map_err(|_| Error::MetricsAlreadyBound {
                label: self.label().to_string(),
            })?;
        self.publish_consumption();
        Ok(())
    }
}

/// Name-keyed gauge registry for tests and light embedding. Production
/// deployments adapt their own telemetry stack behind [`MetricsRegistry`].
#[derive(Default)]
pub struct InMemoryMetrics {
    gauges: Mutex<HashMap<String, Arc<Gauge>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Gauge>> {
        self.gauges.lock().unwrap().get(name).map(Arc::clone)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.gauges.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

impl MetricsRegistry for InMemoryMetrics {
    fn gauge(&self, name: &str) -> Arc<Gauge> {
        let mut gauges = self.gauges.lock().unwrap();
        Arc::clone(
            gauges
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Gauge::new())),
        )
    }
}
