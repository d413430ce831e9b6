use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;

use crate::config::PricingConfig;
use crate::models::{AggregationResult, PriceOrigin, PriceSample};

/// Minimum number of samples before IQR filtering is trusted
pub const MIN_SAMPLES_FOR_IQR: usize = 4;

/// Turns a round of competitor prices into our sale price
///
/// Pure and stateless: the same sample set always yields the same price.
/// `our_price = max(median(filtered) * discount_rate, cost_floor * (1 + profit_margin))`
#[derive(Debug, Clone)]
pub struct Aggregator {
    floor_price: Decimal,
    discount_rate: Decimal,
}

impl Aggregator {
    pub fn new(config: &PricingConfig) -> Self {
        Self {
            // Rounded up so that cent rounding can never undercut the floor
            floor_price: config
                .floor_price()
                .round_dp_with_strategy(2, RoundingStrategy::AwayFromZero),
            discount_rate: config.discount_rate,
        }
    }

    /// Lowest sale price this aggregator will ever produce
    pub fn floor_price(&self) -> Decimal {
        self.floor_price
    }

    /// Compute a full result for one round of samples
    ///
    /// # Arguments
    /// * `samples` - competitor prices keyed by source name (may be empty)
    /// * `last_good` - unexpired cached result, reused when there is no usable data
    ///
    /// Prices outside `(0, MAX_SAMPLE_PRICE]` are discarded before anything else.
    pub fn compute(
        &self,
        samples: &BTreeMap<String, Decimal>,
        last_good: Option<&AggregationResult>,
    ) -> AggregationResult {
        let usable: BTreeMap<String, Decimal> = samples
            .iter()
            .filter(|(_, price)| PriceSample::in_range(**price))
            .map(|(name, price)| (name.clone(), *price))
            .collect();

        match self.sale_price(&usable) {
            Some(our_price) => {
                AggregationResult::from_parts(our_price, usable, PriceOrigin::Computed)
            }
            None => match last_good {
                Some(previous) => AggregationResult {
                    origin: PriceOrigin::LastKnownGood,
                    ..previous.clone()
                },
                None => self.floor_result(),
            },
        }
    }

    /// Floor price with no competitor data
    pub fn floor_result(&self) -> AggregationResult {
        AggregationResult::from_parts(self.floor_price, BTreeMap::new(), PriceOrigin::Floor)
    }

    /// Sale price for a sample set, `None` when nothing usable survives filtering
    pub fn sale_price(&self, samples: &BTreeMap<String, Decimal>) -> Option<Decimal> {
        let prices: Vec<Decimal> = samples
            .values()
            .copied()
            .filter(|p| PriceSample::in_range(*p))
            .collect();

        let filtered = remove_outliers(&prices);
        if filtered.is_empty() {
            return None;
        }

        let candidate = median(&filtered)
            .checked_mul(self.discount_rate)?
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        Some(candidate.max(self.floor_price))
    }
}

/// Sort a copy of the prices ascending
fn sorted(prices: &[Decimal]) -> Vec<Decimal> {
    let mut values = prices.to_vec();
    values.sort();
    values
}

/// Quantile by linear interpolation between closest ranks
///
/// `sorted` must be ascending and non-empty; `q` is in [0, 1].
pub fn quantile(sorted: &[Decimal], q: Decimal) -> Decimal {
    if sorted.is_empty() {
        return Decimal::ZERO;
    }

    let position = Decimal::from(sorted.len() - 1) * q;
    let lower = position.floor();
    let fraction = position - lower;
    let index = lower.to_usize().unwrap_or_default().min(sorted.len() - 1);

    if fraction.is_zero() || index + 1 >= sorted.len() {
        return sorted[index];
    }

    let (low, high) = (sorted[index], sorted[index + 1]);
    high
        .checked_sub(low)
        .and_then(|gap| gap.checked_mul(fraction))
        .and_then(|step| low.checked_add(step))
        .unwrap_or(low)
}

/// Interpolated median of an unsorted price list
pub fn median(prices: &[Decimal]) -> Decimal {
    quantile(&sorted(prices), Decimal::new(5, 1))
}

/// Drop prices outside `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]`
///
/// Fewer than four prices are returned unchanged. A fence that leaves the
/// `Decimal` range is open on that side.
pub fn remove_outliers(prices: &[Decimal]) -> Vec<Decimal> {
    if prices.len() < MIN_SAMPLES_FOR_IQR {
        return prices.to_vec();
    }

    let ordered = sorted(prices);
    let q1 = quantile(&ordered, Decimal::new(25, 2));
    let q3 = quantile(&ordered, Decimal::new(75, 2));
    let fence = q3
        .checked_sub(q1)
        .and_then(|iqr| iqr.checked_mul(Decimal::new(15, 1)))
        .unwrap_or(Decimal::MAX);

    let lower_bound = q1.checked_sub(fence).unwrap_or(Decimal::MIN);
    let upper_bound = q3.checked_add(fence).unwrap_or(Decimal::MAX);

    prices
        .iter()
        .copied()
        .filter(|p| *p >= lower_bound && *p <= upper_bound)
        .collect()
}
