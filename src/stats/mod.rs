//! Relay statistics

pub mod metrics;

pub use metrics::{DistributorStats, SourceStats};
pub(crate) use metrics::{DistributorCounters, SourceCounters};
