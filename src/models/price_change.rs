use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Significant move in our sale price between two scheduler rounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChange {
    pub old_price: Decimal,
    pub new_price: Decimal,
    /// Signed change in percent, positive when the price went up
    pub percent_change: Decimal,
    pub detected_at: DateTime<Utc>,
}

impl PriceChange {
    /// Signed percent change from `old` to `new`; `None` when `old` is not positive
    pub fn percent_between(old: Decimal, new: Decimal) -> Option<Decimal> {
        if old <= Decimal::ZERO {
            return None;
        }
        Some((new - old) / old * Decimal::ONE_HUNDRED)
    }

    /// Returns a change event when `|Δ%| >= threshold_percent`
    pub fn detect(old: Decimal, new: Decimal, threshold_percent: Decimal) -> Option<Self> {
        let percent = Self::percent_between(old, new)?;

        if percent.abs() < threshold_percent || percent.is_zero() {
            return None;
        }

        Some(Self {
            old_price: old,
            new_price: new,
            percent_change: percent,
            detected_at: Utc::now(),
        })
    }

    pub fn is_increase(&self) -> bool {
        self.percent_change > Decimal::ZERO
    }
}
