//! Domain models for the pricing engine.
//!
//! Samples and quotes are produced in memory every round; only
//! `PriceHistoryRecord` is backed by a database table.

pub mod price_change;
pub mod price_history;
pub mod price_override;
pub mod price_sample;
pub mod quote;

// Re-export all models for convenient access
pub use price_change::PriceChange;
pub use price_history::{HistoryRound, NewPriceHistoryRecord, PriceHistoryRecord};
pub use price_override::PriceOverride;
pub use price_sample::{PriceSample, MAX_SAMPLE_PRICE};
pub use quote::{AggregationResult, PriceOrigin};
