//! Atomic current/high-water counter, the admission primitive of the tree.

use std::sync::atomic::{AtomicI64, Ordering};

/// Well-known name under which a tracker's counter is published, so runtime
/// profiles can locate it.
pub const COUNTER_NAME: &str = "MemoryConsumption";

/// A signed counter paired with a monotone high-water mark.
///
/// `try_update` is linearizable: after it returns true on one thread, no
/// interleaving lets another conforming caller observe `current > cap` from
/// this counter alone. The peak is maintained with a separate monotonic CAS,
/// so it can briefly lag behind `current` by the width of one update.
#[derive(Debug, Default)]
pub struct HighWaterCounter {
    current: AtomicI64,
    peak: AtomicI64,
}

impl HighWaterCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Maximum value `current` has ever held.
    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    /// Assign `current` outright, e.g. from an external allocator sample.
    pub fn set(&self, v: i64) {
        self.current.store(v, Ordering::Relaxed);
        self.bump_peak(v);
    }

    /// Unconditionally apply `current += delta`; returns the new value.
    pub fn update(&self, delta: i64) -> i64 {
        let next = self.current.fetch_add(delta, Ordering::AcqRel) + delta;
        self.bump_peak(next);
        next
    }

    /// Apply `current += delta` iff the result stays at or below `cap`.
    /// Reports whether the update was applied.
    pub fn try_update(&self, delta: i64, cap: i64) -> bool {
        loop {
            let cur = self.current.load(Ordering::Relaxed);
            let next = cur + delta;
            if next > cap {
                return false;
            }
            if self
                .current
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.bump_peak(next);
                return true;
            }
        }
    }

    fn bump_peak(&self, observed: i64) {
        let mut cur = self.peak.load(Ordering::Relaxed);
        while observed > cur {
            match self
                .peak
                .compare_exchange(cur, observed, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(seen) => cur = seen,
            }
        }
    }
}
