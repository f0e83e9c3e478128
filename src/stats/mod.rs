//! Statistics collection and reporting

pub mod aggregator;
pub mod metrics;

pub use aggregator::{AggregatorConfig, StatsAggregator, StatsReport};
pub use metrics::SessionStats;
