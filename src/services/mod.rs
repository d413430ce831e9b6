pub mod notifier;
pub mod price_scheduler;
pub mod price_service;
pub mod quote_cache;
pub mod sampler;

pub use notifier::{DiscordWebhookNotifier, FanoutNotifier, PriceNotifier};
pub use price_scheduler::{PriceScheduler, SchedulerHandle};
pub use price_service::PriceService;
pub use quote_cache::QuoteCache;
pub use sampler::{HttpPriceSource, PriceSource, SampleError, SampleOutcome, Sampler};
