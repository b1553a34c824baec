//! The accounting tree node.
//!
//! A `MemTracker` tracks memory consumption against an optional byte limit
//! and can be arranged into a tree so that consumption charged to a tracker
//! is also charged to its ancestors. Consumption is normally driven by
//! `consume`/`release`; a tracker built from a [`ConsumptionSource`] instead
//! reports the sampled source value, which is how the process-wide tracker
//! follows the allocator rather than the ledger.
//!
//! Reclamation callbacks can be attached with [`MemTracker::add_gc_callback`].
//! When a limited tracker is pressed, the callbacks run in registration order
//! until consumption drops below the target, so cheap callbacks should be
//! registered first.
//!
//! Children hold strong references up the tree; parents hold weak references
//! down. The chain of ancestors is cached at construction, so the charging
//! walk allocates nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use memtally_core::config::AccountingConfig;
use memtally_core::error::Result;
use memtally_core::metrics::ConsumptionSource;

use crate::counter::HighWaterCounter;
use crate::metrics::TrackerMetrics;
use crate::registry::RegistrySlot;

/// Callback invoked to free memory when a limit is pressed. Callbacks are
/// serialized per tracker by the GC lock, but may run concurrently with
/// `consume`/`release` on the same tracker and with GC on other trackers.
pub type GcFn = Box<dyn Fn() + Send + Sync>;

pub(crate) struct TrackerOpts {
    pub(crate) limit: i64,
    pub(crate) label: String,
    pub(crate) parent: Option<Arc<MemTracker>>,
    pub(crate) counter: Option<Arc<HighWaterCounter>>,
    pub(crate) source: Option<Arc<dyn ConsumptionSource>>,
    pub(crate) auto_unregister: bool,
    pub(crate) registry_slot: Option<RegistrySlot>,
}

pub struct MemTracker {
    limit: i64,
    label: String,
    parent: Option<Arc<MemTracker>>,

    consumption: Arc<HighWaterCounter>,
    consumption_source: Option<Arc<dyn ConsumptionSource>>,

    /// [parent, grandparent, .., root], cached at construction.
    ancestors: Vec<Arc<MemTracker>>,
    /// Indices into the virtual chain [self, parent, .., root] whose limit
    /// is non-negative.
    limited: Vec<usize>,

    /// Live children, keyed by registration slot. Used for reporting only;
    /// updating a parent does not touch its children.
    pub(crate) children: Mutex<BTreeMap<u64, Weak<MemTracker>>>,
    next_child_slot: AtomicU64,
    /// Our key in `parent.children`, for O(1) deregistration.
    child_slot: Option<u64>,
    auto_unregister: bool,

    /// Reclamation callbacks. The mutex doubles as the per-tracker GC lock:
    /// holding it serializes GC passes and their callbacks.
    gc: Mutex<Vec<GcFn>>,

    pub(crate) metrics: OnceLock<TrackerMetrics>,
    registry_slot: Option<RegistrySlot>,
    self_weak: Weak<MemTracker>,

    log_updates: AtomicBool,
}

impl MemTracker {
    /// Standalone tracker. `limit < 0` means no limit.
    pub fn new(
        limit: i64,
        label: impl Into<String>,
        parent: Option<&Arc<MemTracker>>,
    ) -> Arc<MemTracker> {
        Self::build(TrackerOpts {
            limit,
            label: label.into(),
            parent: parent.map(Arc::clone),
            counter: None,
            source: None,
            auto_unregister: false,
            registry_slot: None,
        })
    }

    /// Tracker whose consumption counter lives elsewhere, e.g. inside a
    /// runtime profile. The counter should be published under
    /// [`crate::counter::COUNTER_NAME`].
    pub fn with_counter(
        counter: Arc<HighWaterCounter>,
        limit: i64,
        label: impl Into<String>,
        parent: Option<&Arc<MemTracker>>,
    ) -> Arc<MemTracker> {
        Self::build(TrackerOpts {
            limit,
            label: label.into(),
            parent: parent.map(Arc::clone),
            counter: Some(counter),
            source: None,
            auto_unregister: false,
            registry_slot: None,
        })
    }

    /// Root tracker that follows an external consumption source instead of
    /// the ledger. `consume`/`release` re-sample the source, so the same call
    /// sites work against every tracker. Source-backed trackers take no
    /// parent: the sample already covers the whole process.
    pub fn with_consumption_source(
        source: Arc<dyn ConsumptionSource>,
        limit: i64,
        label: impl Into<String>,
    ) -> Arc<MemTracker> {
        Self::build(TrackerOpts {
            limit,
            label: label.into(),
            parent: None,
            counter: None,
            source: Some(source),
            auto_unregister: false,
            registry_slot: None,
        })
    }

    /// Process-wide tracker from configuration.
    pub fn process_root(
        cfg: &AccountingConfig,
        source: Arc<dyn ConsumptionSource>,
    ) -> Result<Arc<MemTracker>> {
        cfg.validate()?;
        let tracker = Self::with_consumption_source(source, cfg.process_limit_bytes, "process");
        if cfg.log_updates {
            tracker.enable_logging(true);
        }
        Ok(tracker)
    }

    pub(crate) fn build(opts: TrackerOpts) -> Arc<MemTracker> {
        let ancestors = match &opts.parent {
            Some(p) => {
                let mut chain = Vec::with_capacity(1 + p.ancestors.len());
                chain.push(Arc::clone(p));
                chain.extend(p.ancestors.iter().cloned());
                chain
            }
            None => Vec::new(),
        };

        let mut limited = Vec::new();
        if opts.limit >= 0 {
            limited.push(0);
        }
        for (i, a) in ancestors.iter().enumerate() {
            if a.has_limit() {
                limited.push(i + 1);
            }
        }

        let child_slot = opts
            .parent
            .as_ref()
            .map(|p| p.next_child_slot.fetch_add(1, Ordering::Relaxed));

        let tracker = Arc::new_cyclic(|weak| MemTracker {
            limit: opts.limit,
            label: opts.label,
            parent: opts.parent,
            consumption: opts.counter.unwrap_or_default(),
            consumption_source: opts.source,
            ancestors,
            limited,
            children: Mutex::new(BTreeMap::new()),
            next_child_slot: AtomicU64::new(0),
            child_slot,
            auto_unregister: opts.auto_unregister,
            gc: Mutex::new(Vec::new()),
            metrics: OnceLock::new(),
            registry_slot: opts.registry_slot,
            self_weak: weak.clone(),
            log_updates: AtomicBool::new(false),
        });

        if let (Some(parent), Some(slot)) = (&tracker.parent, tracker.child_slot) {
            parent
                .children
                .lock()
                .unwrap()
                .insert(slot, Arc::downgrade(&tracker));
        }

        tracker
    }

    /// Increases consumption of this tracker and its ancestors by `bytes`.
    pub fn consume(&self, bytes: i64) {
        if let Some(source) = &self.consumption_source {
            self.consumption.set(source.consumed_bytes());
            self.publish_consumption();
            return;
        }
        if bytes == 0 {
            return;
        }
        self.log_update("consume", bytes);
        for i in 0..self.chain_len() {
            let t = self.node(i);
            let after = t.consumption.update(bytes);
            debug_assert!(after >= 0, "consumption went negative on '{}'", t.label);
            t.publish_consumption();
        }
    }

    /// Decreases consumption of this tracker and its ancestors by `bytes`.
    pub fn release(&self, bytes: i64) {
        if let Some(source) = &self.consumption_source {
            self.consumption.set(source.consumed_bytes());
            self.publish_consumption();
            return;
        }
        if bytes == 0 {
            return;
        }
        self.log_update("release", bytes);
        for i in 0..self.chain_len() {
            let t = self.node(i);
            let after = t.consumption.update(-bytes);
            debug_assert!(after >= 0, "consumption went negative on '{}'", t.label);
            t.publish_consumption();
        }
    }

    /// Increases consumption of this tracker and its ancestors by `bytes`
    /// only if every one of them can absorb the charge. If any node would go
    /// over its limit, nodes that were already charged are rolled back and
    /// the charge is rejected.
    ///
    /// A limited node that rejects the charge gets one GC pass and one retry
    /// before the walk gives up. Rollback does not lower high-water marks;
    /// the peak is an advisory watermark, not an exact maximum of admitted
    /// charges.
    pub fn try_consume(&self, bytes: i64) -> bool {
        if let Some(source) = &self.consumption_source {
            self.consumption.set(source.consumed_bytes());
        }
        if bytes == 0 {
            return true;
        }
        self.log_update("try_consume", bytes);

        let len = self.chain_len();
        let mut failed_at = None;
        for i in 0..len {
            let t = self.node(i);
            if t.limit < 0 {
                t.consumption.update(bytes);
            } else if !t.consumption.try_update(bytes, t.limit) {
                // Over the limit: GC down to where the charge would fit,
                // then retry once. Bail if either fails.
                if t.gc_memory(t.limit - bytes) || !t.consumption.try_update(bytes, t.limit) {
                    failed_at = Some(i);
                    break;
                }
            }
            t.publish_consumption();
        }

        match failed_at {
            None => true,
            Some(stop) => {
                for j in 0..stop {
                    let t = self.node(j);
                    t.consumption.update(-bytes);
                    t.publish_consumption();
                }
                false
            }
        }
    }

    /// Returns true if this tracker or any ancestor with a limit is over it,
    /// after giving each pressed tracker a chance to reclaim.
    pub fn any_limit_exceeded(&self) -> bool {
        self.limited.iter().any(|&i| self.node(i).limit_exceeded())
    }

    /// If this tracker has a limit and is over it, runs the GC callbacks and
    /// reports whether the limit is still exceeded afterwards. Unlimited
    /// trackers always report false.
    pub fn limit_exceeded(&self) -> bool {
        if self.check_limit_exceeded() {
            if let Some(m) = self.metrics.get() {
                m.bytes_over_limit.set(self.consumption() - self.limit);
            }
            return self.gc_memory(self.limit);
        }
        false
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn has_limit(&self) -> bool {
        self.limit >= 0
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Memory consumed in bytes.
    pub fn consumption(&self) -> i64 {
        self.consumption.current()
    }

    /// High-water mark of `consumption`. For a source-backed tracker this is
    /// the highest *sampled* value, not necessarily the highest the source
    /// ever reached between samples.
    pub fn peak_consumption(&self) -> i64 {
        self.consumption.peak()
    }

    pub fn parent(&self) -> Option<Arc<MemTracker>> {
        self.parent.as_ref().map(Arc::clone)
    }

    /// The counter backing this tracker, for publication into a profile.
    pub fn consumption_counter(&self) -> Arc<HighWaterCounter> {
        Arc::clone(&self.consumption)
    }

    /// Add a callback to run when the limit is pressed. Callbacks run in
    /// registration order, so expensive ones should be added last. All
    /// registration must happen before the tracker is shared across threads,
    /// or the caller must provide its own synchronization.
    pub fn add_gc_callback<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.gc.lock().unwrap().push(Box::new(f));
    }

    /// Trace every consume/release on this tracker. No-op unless the
    /// `tracing` feature is enabled.
    pub fn enable_logging(&self, enabled: bool) {
        self.log_updates.store(enabled, Ordering::Relaxed);
    }

    /// Removes this tracker from its parent's children list. Charging is
    /// unaffected: the ancestor chain is cached, and deregistration only
    /// stops this tracker from appearing in the parent's usage report.
    ///
    /// Also runs from the destructor, which must not double-panic on a
    /// poisoned lock.
    pub fn unregister_from_parent(&self) {
        if let (Some(parent), Some(slot)) = (&self.parent, self.child_slot) {
            parent
                .children
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&slot);
        }
    }

    /// Attempts to reclaim until consumption is at or below `target`.
    /// Returns whether consumption still exceeds `target`.
    fn gc_memory(&self, target: i64) -> bool {
        // The callbacks vec is the GC lock; holding it keeps concurrent GC
        // passes on this tracker from stacking up.
        let callbacks = self.gc.lock().unwrap();
        let before = self.consumption();
        if before <= target {
            return false;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            label = %self.label,
            consumption = before,
            gc_target = target,
            "gc pass"
        );

        for f in callbacks.iter() {
            f();
            if self.consumption() <= target {
                break;
            }
        }

        let after = self.consumption();
        if let Some(m) = self.metrics.get() {
            m.num_gcs.add(1);
            m.bytes_freed_by_last_gc.set(before - after);
        }
        after > target
    }

    fn check_limit_exceeded(&self) -> bool {
        self.limit >= 0 && self.consumption() > self.limit
    }

    fn chain_len(&self) -> usize {
        1 + self.ancestors.len()
    }

    /// Node `idx` of the virtual chain [self, parent, .., root].
    fn node(&self, idx: usize) -> &MemTracker {
        if idx == 0 {
            self
        } else {
            &self.ancestors[idx - 1]
        }
    }

    pub(crate) fn publish_consumption(&self) {
        if let Some(m) = self.metrics.get() {
            m.consumption.set(self.consumption.current());
            m.peak_consumption.set(self.consumption.peak());
        }
    }

    #[cfg(feature = "tracing")]
    fn log_update(&self, op: &'static str, bytes: i64) {
        if self.log_updates.load(Ordering::Relaxed) {
            tracing::trace!(
                label = %self.label,
                op,
                bytes,
                consumption = self.consumption(),
                "mem update"
            );
        }
    }

    #[cfg(not(feature = "tracing"))]
    fn log_update(&self, _op: &'static str, _bytes: i64) {}
}

impl Drop for MemTracker {
    fn drop(&mut self) {
        if self.auto_unregister {
            self.unregister_from_parent();
        }
        if let Some(slot) = &self.registry_slot {
            slot.remove_if_current(&self.self_weak);
        }
    }
}

impl fmt::Debug for MemTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTracker")
            .field("label", &self.label)
            .field("limit", &self.limit)
            .field("consumption", &self.consumption())
            .field("peak", &self.peak_consumption())
            .finish_non_exhaustive()
    }
}
