use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::models::{AggregationResult, PriceOverride};

#[derive(Debug, Clone)]
struct CachedQuote {
    result: AggregationResult,
    stored_at: Instant,
}

/// Latest quote with a freshness window, plus the operator override slot
///
/// Owned by `PriceService`; share it through an `Arc` handle.
pub struct QuoteCache {
    ttl: Duration,
    entry: RwLock<Option<CachedQuote>>,
    price_override: RwLock<Option<PriceOverride>>,
}

impl QuoteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
            price_override: RwLock::new(None),
        }
    }

    /// Cached quote if it is younger than the TTL
    pub async fn get_fresh(&self) -> Option<AggregationResult> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|cached| cached.stored_at.elapsed() < self.ttl)
            .map(|cached| cached.result.clone())
    }

    /// Cached quote regardless of age
    pub async fn get_any(&self) -> Option<AggregationResult> {
        self.entry.read().await.as_ref().map(|cached| cached.result.clone())
    }

    /// Store a new quote and restart the freshness window
    pub async fn put(&self, result: AggregationResult) {
        let mut entry = self.entry.write().await;
        *entry = Some(CachedQuote {
            result,
            stored_at: Instant::now(),
        });
    }

    pub async fn set_override(&self, price_override: PriceOverride) {
        *self.price_override.write().await = Some(price_override);
    }

    /// Unexpired override, dropping it once it has lapsed
    pub async fn active_override(&self) -> Option<PriceOverride> {
        {
            let current = self.price_override.read().await;
            match current.as_ref() {
                Some(o) if o.is_active() => return Some(o.clone()),
                None => return None,
                Some(_) => {}
            }
        }

        let mut current = self.price_override.write().await;
        if current.as_ref().is_some_and(|o| !o.is_active()) {
            *current = None;
        }
        current.clone()
    }

    /// Remove the override; returns whether one was active
    pub async fn clear_override(&self) -> bool {
        let mut current = self.price_override.write().await;
        current.take().is_some_and(|o| o.is_active())
    }
}
