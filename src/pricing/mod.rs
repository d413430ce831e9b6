//! Sale price derivation from competitor samples.

pub mod aggregator;

pub use aggregator::{median, quantile, remove_outliers, Aggregator};
