//! Session aggregation helpers used by the report and the run summary.

pub mod aggregator;

pub use aggregator::*;
