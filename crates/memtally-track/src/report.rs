//! Recursive usage dump for diagnostics.

use std::fmt::Write as _;
use std::sync::{Arc, Weak};

use crate::tracker::MemTracker;

impl MemTracker {
    /// Renders this tracker and its children, one line each, children
    /// indented by depth. `prefix` is prepended to every line.
    pub fn log_usage(&self, prefix: &str) -> String {
        let mut out = String::new();
        self.write_usage(prefix, &mut out);
        out
    }

    fn write_usage(&self, prefix: &str, out: &mut String) {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(
            out,
            "{}{}: consumption={} peak={} limit={}",
            prefix,
            self.label(),
            self.consumption(),
            self.peak_consumption(),
            self.limit(),
        );

        // Snapshot under the lock, render outside it: each child's dump
        // takes that child's own lock, and a subtree of arbitrary depth
        // should never render under ours.
        let children: Vec<Arc<MemTracker>> = {
            let children = self.children.lock().unwrap();
            children.values().filter_map(Weak::upgrade).collect()
        };

        let child_prefix = format!("{}  ", prefix);
        for child in children {
            child.write_usage(&child_prefix, out);
        }
    }
}
