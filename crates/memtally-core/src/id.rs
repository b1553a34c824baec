//! Strongly-typed identifiers used across the accounting tree.
//!
//! Downstream crates (fragment init, the query registry) should *not* use raw
//! integers or strings for query identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier for a query. All fragments of one query share an id, so
/// registry lookups collapse onto a single per-query tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(transparent)]
pub struct QueryId(Uuid);

impl QueryId {
    pub const fn new(v: Uuid) -> Self {
        Self(v)
    }

    /// Fresh random id, for coordinators that mint query ids locally.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn get(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryId({})", self.0)
    }
}
