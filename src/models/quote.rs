use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How `our_price` was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceOrigin {
    /// Derived from fresh competitor samples
    Computed,
    /// No samples this round; previous cached quote reused
    LastKnownGood,
    /// No samples and nothing cached; floor price
    Floor,
    /// Operator override in effect
    Override,
}

impl PriceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceOrigin::Computed => "computed",
            PriceOrigin::LastKnownGood => "last_known_good",
            PriceOrigin::Floor => "floor",
            PriceOrigin::Override => "override",
        }
    }
}

/// Output of one pricing round, superseded (never mutated) by the next one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub our_price: Decimal,
    /// Pre-filter competitor prices keyed by source name
    pub raw_samples: BTreeMap<String, Decimal>,
    pub average_competitor_price: Decimal,
    pub savings_percent: Decimal,
    pub origin: PriceOrigin,
    pub computed_at: DateTime<Utc>,
}

impl AggregationResult {
    /// Mean of the competitor prices, or zero without samples
    ///
    /// Falls back to zero if the sum leaves the `Decimal` range.
    pub fn average_of(samples: &BTreeMap<String, Decimal>) -> Decimal {
        if samples.is_empty() {
            return Decimal::ZERO;
        }
        samples
            .values()
            .try_fold(Decimal::ZERO, |total, price| total.checked_add(*price))
            .and_then(|total| total.checked_div(Decimal::from(samples.len())))
            .unwrap_or(Decimal::ZERO)
    }

    /// Percent saved versus the competitor average, zero without samples
    pub fn savings_against(average: Decimal, our_price: Decimal) -> Decimal {
        if average.is_zero() {
            return Decimal::ZERO;
        }
        average
            .checked_sub(our_price)
            .and_then(|diff| diff.checked_div(average))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO)
    }

    /// Build a result for a given price, deriving the competitor statistics
    pub fn from_parts(
        our_price: Decimal,
        raw_samples: BTreeMap<String, Decimal>,
        origin: PriceOrigin,
    ) -> Self {
        let average = Self::average_of(&raw_samples);
        let savings = Self::savings_against(average, our_price);

        Self {
            our_price,
            raw_samples,
            average_competitor_price: average.round_dp(2),
            savings_percent: savings.round_dp(2),
            origin,
            computed_at: Utc::now(),
        }
    }

    /// Price quoted for an order of `amount_gp` gold pieces
    pub fn price_for_amount(&self, amount_gp: u64) -> Decimal {
        (Decimal::from(amount_gp) / Decimal::from(1_000_000u64) * self.our_price).round_dp(2)
    }

    pub fn has_competitor_data(&self) -> bool {
        !self.raw_samples.is_empty()
    }
}
