use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Highest plausible competitor quote, in USD per 1M GP
pub const MAX_SAMPLE_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// One competitor quote observed during a sampling round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub source_name: String,
    pub price: Decimal, // USD per 1M GP
    pub observed_at: DateTime<Utc>,
}

impl PriceSample {
    /// Create a sample stamped with the current time
    ///
    /// Returns `None` for prices outside `(0, MAX_SAMPLE_PRICE]`.
    pub fn new(source_name: impl Into<String>, price: Decimal) -> Option<Self> {
        if !Self::in_range(price) {
            return None;
        }

        Some(Self {
            source_name: source_name.into(),
            price,
            observed_at: Utc::now(),
        })
    }

    /// Whether a quoted price is usable as a sample
    pub fn in_range(price: Decimal) -> bool {
        price > Decimal::ZERO && price <= MAX_SAMPLE_PRICE
    }
}
