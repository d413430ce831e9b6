use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::models::PriceChange;
use crate::services::notifier::PriceNotifier;
use crate::services::price_service::PriceService;

/// Periodic price refresh that raises change events on significant moves
pub struct PriceScheduler {
    service: Arc<PriceService>,
    notifier: Arc<dyn PriceNotifier>,
    poll_interval: Duration,
    change_threshold: Decimal, // Percent move that triggers a notification (2 = 2%)
    last_price: Option<Decimal>,
}

impl PriceScheduler {
    /// Create a new scheduler
    pub fn new(service: Arc<PriceService>, notifier: Arc<dyn PriceNotifier>) -> Self {
        Self {
            service,
            notifier,
            poll_interval: Duration::from_secs(15 * 60), // Default: 15 minutes
            change_threshold: Decimal::new(2, 0),
            last_price: None,
        }
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set price change threshold in percent
    pub fn with_change_threshold(mut self, threshold: Decimal) -> Self {
        self.change_threshold = threshold;
        self
    }

    /// Price seen at the end of the previous round
    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    /// Run a single forced round and notify if the price moved enough
    pub async fn run_once(&mut self) -> Option<PriceChange> {
        let quote = self.service.refresh().await;

        if let Err(e) = self.notifier.publish_quote(&quote).await {
            warn!("Failed to publish quote: {}", e);
        }

        let change = self
            .last_price
            .and_then(|old| PriceChange::detect(old, quote.our_price, self.change_threshold));

        if let Some(change) = &change {
            info!(
                "Significant price change: ${} -> ${} ({}%)",
                change.old_price,
                change.new_price,
                change.percent_change.round_dp(2)
            );
            if let Err(e) = self.notifier.notify_change(change).await {
                error!("Failed to deliver price change notification: {}", e);
            }
        }

        self.last_price = Some(quote.our_price);
        info!("Price update completed: ${}", quote.our_price);
        change
    }

    /// Start the scheduler on its own task; the first round runs immediately
    ///
    /// Rounds never overlap: ticks missed while a round is in flight are skipped.
    pub fn start(mut self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Price scheduler started, running every {:?}", self.poll_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Price scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, task }
    }
}

/// Owner handle for a running scheduler
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the scheduler to stop and wait for the in-flight round to finish
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Price scheduler task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
