use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

use super::{AggregationResult, PriceSample};

/// Price history row, one per (source, round)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PriceHistoryRecord {
    pub id: i64,
    pub source_name: String,
    pub price: Decimal,     // NUMERIC, as quoted
    pub our_price: Decimal, // NUMERIC, whole cents
    pub observed_at: DateTime<Utc>,
}

/// History row not yet persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPriceHistoryRecord {
    pub source_name: String,
    pub price: Decimal,
    pub our_price: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl NewPriceHistoryRecord {
    /// One record per sample of a computed round, all stamped with the round time
    pub fn for_round(samples: &[PriceSample], result: &AggregationResult) -> Vec<Self> {
        samples
            .iter()
            .map(|sample| Self {
                source_name: sample.source_name.clone(),
                price: sample.price,
                our_price: result.our_price,
                observed_at: result.computed_at,
            })
            .collect()
    }
}

/// All samples recorded at the same instant, for charting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRound {
    pub observed_at: DateTime<Utc>,
    pub our_price: Decimal,
    pub competitors: BTreeMap<String, Decimal>,
}

impl HistoryRound {
    /// Group rows by timestamp, preserving ascending order
    pub fn group(records: &[PriceHistoryRecord]) -> Vec<Self> {
        let mut rounds: BTreeMap<DateTime<Utc>, HistoryRound> = BTreeMap::new();

        for record in records {
            rounds
                .entry(record.observed_at)
                .or_insert_with(|| HistoryRound {
                    observed_at: record.observed_at,
                    our_price: record.our_price,
                    competitors: BTreeMap::new(),
                })
                .competitors
                .insert(record.source_name.clone(), record.price);
        }

        rounds.into_values().collect()
    }
}
