//! Process-wide deduplication of per-query trackers.
//!
//! Every fragment of a query running on this machine looks its tracker up by
//! query id, so limits apply per query rather than per fragment. The registry
//! holds only weak references; the strong references are held by fragment
//! code. When the last fragment drops its handle, the tracker detaches from
//! its parent and removes its own registry entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use memtally_core::config::AccountingConfig;
use memtally_core::id::QueryId;

use crate::tracker::{MemTracker, TrackerOpts};

pub(crate) type EntryMap = Mutex<HashMap<QueryId, Weak<MemTracker>>>;

/// Handle a dying tracker uses to clean its own registry entry.
pub(crate) struct RegistrySlot {
    id: QueryId,
    entries: Arc<EntryMap>,
}

impl RegistrySlot {
    /// Remove the entry for `id` iff it still points at the dying tracker.
    /// A concurrent lookup may already have replaced a stale entry with a
    /// fresh tracker; that entry must survive.
    ///
    /// Runs from the tracker destructor, which must not double-panic on a
    /// poisoned lock.
    pub(crate) fn remove_if_current(&self, dying: &Weak<MemTracker>) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = entries.get(&self.id) {
            if Weak::ptr_eq(existing, dying) {
                entries.remove(&self.id);
            }
        }
    }
}

#[derive(Default)]
pub struct TrackerRegistry {
    entries: Arc<EntryMap>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-global registry behind [`MemTracker::get_query_tracker`].
    pub fn global() -> &'static TrackerRegistry {
        static GLOBAL: OnceLock<TrackerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(TrackerRegistry::new)
    }

    /// Returns the tracker for query `id`, creating it on first lookup.
    ///
    /// Calls with the same id return the same tracker for as long as any
    /// strong handle to it is alive. `limit` and `parent` must be the same
    /// for every call with a given id; this is a caller contract, checked
    /// only in debug builds.
    pub fn get_query_tracker(
        &self,
        id: QueryId,
        limit: i64,
        parent: &Arc<MemTracker>,
    ) -> Arc<MemTracker> {
        let mut entries = self.entries.lock().unwrap();

        // A dead weak entry means the tracker's destructor has run but its
        // cleanup lost the race with us; treat the slot as vacant.
        if let Some(existing) = entries.get(&id).and_then(Weak::upgrade) {
            debug_assert_eq!(
                existing.limit(),
                limit,
                "query tracker limit changed across lookups of {id}"
            );
            debug_assert!(
                existing
                    .parent()
                    .is_some_and(|p| Arc::ptr_eq(&p, parent)),
                "query tracker parent changed across lookups of {id}"
            );
            return existing;
        }

        let tracker = MemTracker::build(TrackerOpts {
            limit,
            label: format!("query-{}", id.get()),
            parent: Some(Arc::clone(parent)),
            counter: None,
            source: None,
            auto_unregister: true,
            registry_slot: Some(RegistrySlot {
                id,
                entries: Arc::clone(&self.entries),
            }),
        });
        entries.insert(id, Arc::downgrade(&tracker));
        tracker
    }

    /// As [`get_query_tracker`](Self::get_query_tracker), with the limit
    /// taken from configuration.
    pub fn get_query_tracker_with_config(
        &self,
        id: QueryId,
        cfg: &AccountingConfig,
        parent: &Arc<MemTracker>,
    ) -> Arc<MemTracker> {
        self.get_query_tracker(id, cfg.default_query_limit_bytes, parent)
    }

    /// Number of registered entries, live or stale. Stale entries are rare
    /// and transient: the tracker destructor removes its own entry.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemTracker {
    /// Returns the tracker for query `id` from the process-global registry.
    /// See [`TrackerRegistry::get_query_tracker`].
    pub fn get_query_tracker(
        id: QueryId,
        limit: i64,
        parent: &Arc<MemTracker>,
    ) -> Arc<MemTracker> {
        TrackerRegistry::global().get_query_tracker(id, limit, parent)
    }
}
