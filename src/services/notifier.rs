use async_trait::async_trait;
use rust_decimal::RoundingStrategy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{AggregationResult, PriceChange};

const COLOR_PRICE_UP: u32 = 0xFF0000;
const COLOR_PRICE_DOWN: u32 = 0x00FF00;

/// Receives pricing events from the scheduler
///
/// The engine only decides *whether* to notify; implementations decide how.
#[async_trait]
pub trait PriceNotifier: Send + Sync {
    /// Sale price moved by at least the configured threshold
    async fn notify_change(&self, change: &PriceChange) -> AppResult<()>;

    /// A scheduler round finished (called every round)
    async fn publish_quote(&self, _quote: &AggregationResult) -> AppResult<()> {
        Ok(())
    }
}

/// Posts price change alerts to a Discord channel webhook
pub struct DiscordWebhookNotifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl DiscordWebhookNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Discord embed payload for a change event
    pub fn payload_for(change: &PriceChange) -> serde_json::Value {
        let (direction, color) = if change.is_increase() {
            ("📈", COLOR_PRICE_UP)
        } else {
            ("📉", COLOR_PRICE_DOWN)
        };

        let sign = if change.is_increase() { "+" } else { "" };
        let percent = change
            .percent_change
            .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);

        serde_json::json!({
            "embeds": [{
                "title": format!("{} Price Change Alert", direction),
                "description": format!(
                    "Price changed from ${:.2} to ${:.2} ({}{:.1}%)",
                    change.old_price, change.new_price, sign, percent
                ),
                "color": color,
                "timestamp": change.detected_at.to_rfc3339(),
            }]
        })
    }
}

#[async_trait]
impl PriceNotifier for DiscordWebhookNotifier {
    async fn notify_change(&self, change: &PriceChange) -> AppResult<()> {
        let Some(url) = &self.webhook_url else {
            info!("DISCORD_WEBHOOK_URL not set, skipping price change webhook");
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&Self::payload_for(change))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Discord webhook failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "Discord webhook returned {}",
                response.status()
            )));
        }

        info!(
            "Price change alert sent: {} -> {} ({}%)",
            change.old_price,
            change.new_price,
            change.percent_change.round_dp(2)
        );
        Ok(())
    }
}

/// Delivers every event to all targets; one failing target does not stop the rest
#[derive(Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn PriceNotifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: Arc<dyn PriceNotifier>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl PriceNotifier for FanoutNotifier {
    async fn notify_change(&self, change: &PriceChange) -> AppResult<()> {
        let mut failures = 0;
        for target in &self.targets {
            if let Err(e) = target.notify_change(change).await {
                error!("Price change notification failed: {}", e);
                failures += 1;
            }
        }

        if failures > 0 && failures == self.targets.len() {
            return Err(AppError::ExternalService(
                "all price change notifications failed".to_string(),
            ));
        }
        Ok(())
    }

    async fn publish_quote(&self, quote: &AggregationResult) -> AppResult<()> {
        for target in &self.targets {
            if let Err(e) = target.publish_quote(quote).await {
                warn!("Quote publication failed: {}", e);
            }
        }
        Ok(())
    }
}
