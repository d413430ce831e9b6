use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{PriceFormat, SourceConfig};
use crate::error::{AppError, AppResult};
use crate::models::PriceSample;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Why a single source produced no sample this round
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("price not found in response")]
    MissingPrice,

    #[error("unparseable price text: {0:?}")]
    Parse(String),

    #[error("non-positive price: {0}")]
    NonPositive(Decimal),

    #[error("price out of range: {0}")]
    OutOfRange(Decimal),
}

/// Result of fetching one source
#[derive(Debug)]
pub enum SampleOutcome {
    Success(PriceSample),
    Failure {
        source_name: String,
        reason: SampleError,
    },
}

/// A competitor that quotes a price per 1M GP
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_price(&self) -> Result<Decimal, SampleError>;
}

/// Competitor page or API fetched over HTTP
pub struct HttpPriceSource {
    config: SourceConfig,
    client: reqwest::Client,
}

impl HttpPriceSource {
    pub fn new(config: SourceConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn fetch_price(&self) -> Result<Decimal, SampleError> {
        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| SampleError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SampleError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SampleError::Request(e.to_string()))?;

        extract_price(&self.config.format, &body)
    }
}

/// Parse price text such as `"$1.23"`, `"1,234.50 USD"` or `"0.95"`
pub fn parse_price_text(text: &str) -> Result<Decimal, SampleError> {
    let cleaned: String = text
        .trim()
        .trim_end_matches("USD")
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(SampleError::MissingPrice);
    }

    Decimal::from_str(&cleaned).map_err(|_| SampleError::Parse(text.trim().to_string()))
}

/// Text content of the first element whose class list contains `class`
pub fn text_by_class(html: &str, class: &str) -> Option<String> {
    let mut rest = html;

    while let Some(pos) = rest.find("class=") {
        let after = &rest[pos + "class=".len()..];
        let quote = after.chars().next()?;
        if quote != '"' && quote != '\'' {
            rest = after;
            continue;
        }

        let value_end = after[1..].find(quote)? + 1;
        let classes = &after[1..value_end];
        let tail = &after[value_end..];

        if classes.split_whitespace().any(|c| c == class) {
            let open_end = tail.find('>')?;
            let content = &tail[open_end + 1..];
            let close = content.find('<').unwrap_or(content.len());
            let text = content[..close].trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }

        rest = tail;
    }

    None
}

/// Pull the price out of a response body according to the source format
pub fn extract_price(format: &PriceFormat, body: &str) -> Result<Decimal, SampleError> {
    match format {
        PriceFormat::Json { pointer } => {
            let value: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| SampleError::Parse(format!("invalid JSON: {}", e)))?;

            match value.pointer(pointer) {
                Some(serde_json::Value::Number(n)) => Decimal::from_str(&n.to_string())
                    .or_else(|_| Decimal::from_scientific(&n.to_string()))
                    .map_err(|_| SampleError::Parse(n.to_string())),
                Some(serde_json::Value::String(s)) => parse_price_text(s),
                Some(other) => Err(SampleError::Parse(other.to_string())),
                None => Err(SampleError::MissingPrice),
            }
        }
        PriceFormat::HtmlClass { class } => {
            let text = text_by_class(body, class).ok_or(SampleError::MissingPrice)?;
            parse_price_text(&text)
        }
        PriceFormat::PlainText => parse_price_text(body),
    }
}

/// Fetches every enabled source concurrently, each bounded by a timeout
pub struct Sampler {
    sources: Vec<Arc<dyn PriceSource>>,
    timeout: Duration,
}

impl Sampler {
    /// Create a sampler over already-constructed sources
    pub fn new(sources: Vec<Arc<dyn PriceSource>>, timeout: Duration) -> Self {
        Self { sources, timeout }
    }

    /// Build HTTP sources for every enabled entry in the config
    pub fn from_config(configs: &[SourceConfig], timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::ExternalService(format!("Failed to build HTTP client: {}", e)))?;

        let sources: Vec<Arc<dyn PriceSource>> = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| Arc::new(HttpPriceSource::new(c.clone(), client.clone())) as Arc<dyn PriceSource>)
            .collect();

        info!("Sampler configured with {} enabled sources", sources.len());

        Ok(Self::new(sources, timeout))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Fetch one source, turning every failure mode into an outcome
    async fn sample_one(&self, source: &Arc<dyn PriceSource>) -> SampleOutcome {
        let source_name = source.name().to_string();

        let result = match tokio::time::timeout(self.timeout, source.fetch_price()).await {
            Ok(Ok(price)) => PriceSample::new(source_name.clone(), price).ok_or(
                if price <= Decimal::ZERO {
                    SampleError::NonPositive(price)
                } else {
                    SampleError::OutOfRange(price)
                },
            ),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SampleError::Timeout(self.timeout)),
        };

        match result {
            Ok(sample) => SampleOutcome::Success(sample),
            Err(reason) => SampleOutcome::Failure { source_name, reason },
        }
    }

    /// Fetch all sources; one outcome per source, in source order
    pub async fn sample_all(&self) -> Vec<SampleOutcome> {
        join_all(self.sources.iter().map(|source| self.sample_one(source))).await
    }

    /// Fetch all sources and keep only the successful samples
    pub async fn collect(&self) -> Vec<PriceSample> {
        let outcomes = self.sample_all().await;
        let attempted = outcomes.len();

        let samples: Vec<PriceSample> = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                SampleOutcome::Success(sample) => {
                    debug!("{} quoted ${}", sample.source_name, sample.price);
                    Some(sample)
                }
                SampleOutcome::Failure { source_name, reason } => {
                    warn!("Dropping source {}: {}", source_name, reason);
                    None
                }
            })
            .collect();

        info!("Sampled {}/{} sources", samples.len(), attempted);
        samples
    }
}

/// Source name -> price mapping used by the aggregator
pub fn to_price_map(samples: &[PriceSample]) -> BTreeMap<String, Decimal> {
    samples
        .iter()
        .map(|s| (s.source_name.clone(), s.price))
        .collect()
}
