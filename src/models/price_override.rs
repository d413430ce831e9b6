use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{AppError, AppResult};

/// Operator-set price that bypasses automatic pricing until it expires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceOverride {
    pub value: Decimal,
    pub set_at: DateTime<Utc>,
    expires_at: Instant,
}

impl PriceOverride {
    /// Create an override valid for `ttl` from now
    ///
    /// Non-positive values are rejected here so they never reach pricing.
    pub fn new(value: Decimal, ttl: Duration) -> AppResult<Self> {
        if value <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Override price must be positive, got {}",
                value
            )));
        }

        Ok(Self {
            value: value.round_dp(2),
            set_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        })
    }

    /// Parse operator input such as `"0.92"` or `"$0.92"`
    pub fn parse(raw: &str, ttl: Duration) -> AppResult<Self> {
        let cleaned = raw.trim().trim_start_matches('$').trim();
        let value = Decimal::from_str(cleaned)
            .map_err(|e| AppError::InvalidDecimal(format!("{}: {}", raw, e)))?;
        Self::new(value, ttl)
    }

    pub fn is_active(&self) -> bool {
        Instant::now() < self.expires_at
    }

    /// Time left before the override lapses
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}
