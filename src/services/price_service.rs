use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::PricingConfig;
use crate::error::{AppError, AppResult};
use crate::models::{AggregationResult, NewPriceHistoryRecord, PriceOrigin, PriceOverride, PriceSample};
use crate::pricing::Aggregator;
use crate::repositories::HistoryStore;
use crate::services::quote_cache::QuoteCache;
use crate::services::sampler::{to_price_map, Sampler};

/// Serves the current sale price, recomputing it when the cache goes stale
///
/// Sampler -> Aggregator -> cache + history, with at most one recomputation
/// in flight; callers arriving during a refresh wait for it and reuse its result.
pub struct PriceService {
    sampler: Sampler,
    aggregator: Aggregator,
    cache: Arc<QuoteCache>,
    history: Option<Arc<dyn HistoryStore>>,
    refresh_lock: Mutex<()>,
    override_ttl: Duration,
    allow_override_below_floor: bool,
    rounds: AtomicU64,
}

impl PriceService {
    /// Create a new price service
    ///
    /// # Arguments
    /// * `config` - Pricing constants (floor, margin, discount, TTLs)
    /// * `sampler` - Fetches competitor prices
    /// * `cache` - Quote cache shared with readers
    pub fn new(config: &PricingConfig, sampler: Sampler, cache: Arc<QuoteCache>) -> Self {
        Self {
            sampler,
            aggregator: Aggregator::new(config),
            cache,
            history: None,
            refresh_lock: Mutex::new(()),
            override_ttl: config.override_ttl(),
            allow_override_below_floor: config.allow_override_below_floor,
            rounds: AtomicU64::new(0),
        }
    }

    /// Persist every sampled round to a history store
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn cache(&self) -> &Arc<QuoteCache> {
        &self.cache
    }

    pub fn floor_price(&self) -> Decimal {
        self.aggregator.floor_price()
    }

    /// Number of sampling rounds run since start
    pub fn rounds_computed(&self) -> u64 {
        self.rounds.load(Ordering::SeqCst)
    }

    /// Current quote: override, else fresh cache, else a new round
    pub async fn get_current(&self) -> AggregationResult {
        if let Some(quote) = self.override_quote().await {
            return quote;
        }

        if let Some(quote) = self.cache.get_fresh().await {
            return quote;
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(quote) = self.cache.get_fresh().await {
            debug!("Reusing quote from concurrent refresh");
            return quote;
        }

        self.recompute().await
    }

    /// Force a new round regardless of cache age (override still wins)
    pub async fn refresh(&self) -> AggregationResult {
        if let Some(quote) = self.override_quote().await {
            return quote;
        }

        let _guard = self.refresh_lock.lock().await;
        self.recompute().await
    }

    /// Apply an operator override given as text
    pub async fn set_override(&self, raw: &str) -> AppResult<PriceOverride> {
        let price_override = PriceOverride::parse(raw, self.override_ttl)?;
        self.apply_override(price_override).await
    }

    /// Apply an operator override given as a decimal
    pub async fn set_override_value(&self, value: Decimal) -> AppResult<PriceOverride> {
        let price_override = PriceOverride::new(value, self.override_ttl)?;
        self.apply_override(price_override).await
    }

    /// Remove the override; returns whether one was active
    pub async fn clear_override(&self) -> bool {
        let cleared = self.cache.clear_override().await;
        if cleared {
            info!("Price override cleared");
        }
        cleared
    }

    async fn apply_override(&self, price_override: PriceOverride) -> AppResult<PriceOverride> {
        let floor = self.aggregator.floor_price();
        if price_override.value < floor && !self.allow_override_below_floor {
            return Err(AppError::Validation(format!(
                "Override {} is below the floor price {}",
                price_override.value, floor
            )));
        }

        info!(
            "Price override set to ${} for {:?}",
            price_override.value,
            price_override.remaining()
        );
        self.cache.set_override(price_override.clone()).await;
        Ok(price_override)
    }

    /// Quote built from the active override and the last known samples
    async fn override_quote(&self) -> Option<AggregationResult> {
        let price_override = self.cache.active_override().await?;

        let last_samples = self
            .cache
            .get_any()
            .await
            .map(|quote| quote.raw_samples)
            .unwrap_or_default();

        Some(AggregationResult::from_parts(
            price_override.value,
            last_samples,
            PriceOrigin::Override,
        ))
    }

    /// Run one sampling round; caller holds `refresh_lock`
    async fn recompute(&self) -> AggregationResult {
        let last_good = self.cache.get_fresh().await;
        let samples = self.sampler.collect().await;
        let result = self
            .aggregator
            .compute(&to_price_map(&samples), last_good.as_ref());

        self.cache.put(result.clone()).await;
        self.rounds.fetch_add(1, Ordering::SeqCst);

        if result.origin == PriceOrigin::Computed {
            self.record_history(&samples, &result).await;
        }

        info!(
            "Prices updated: our price ${}, avg competitor ${} ({}, {} samples)",
            result.our_price,
            result.average_competitor_price,
            result.origin.as_str(),
            samples.len()
        );

        result
    }

    /// Append the round to history; failures never block the price
    async fn record_history(&self, samples: &[PriceSample], result: &AggregationResult) {
        let Some(history) = &self.history else {
            return;
        };

        let records = NewPriceHistoryRecord::for_round(samples, result);
        match history.append(&records).await {
            Ok(written) => debug!("Recorded {} price history rows", written),
            Err(e) => error!("Failed to record price history: {}", e),
        }
    }
}
