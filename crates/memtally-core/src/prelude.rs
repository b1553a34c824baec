//! Convenient re-exports for downstream crates.

pub use crate::config::AccountingConfig;
pub use crate::error::{Error, Result};
pub use crate::id::QueryId;
pub use crate::metrics::{ConsumptionSource, Gauge, MetricsRegistry};
