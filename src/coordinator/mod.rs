//! Coordinator-side round aggregation.

pub mod aggregator;

pub use aggregator::{CoeffAggregator, ContributionRecord};
