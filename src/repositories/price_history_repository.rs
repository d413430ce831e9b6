use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::error::RepositoryError;
use crate::models::{HistoryRound, NewPriceHistoryRecord, PriceHistoryRecord};

/// Append-only sink for per-round competitor samples
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist one round; returns the number of rows written
    async fn append(&self, records: &[NewPriceHistoryRecord]) -> Result<u64, RepositoryError>;
}

/// Repository for price history data access
pub struct PriceHistoryRepository {
    pool: PgPool,
}

impl PriceHistoryRepository {
    /// Create a new PriceHistoryRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a single history row
    pub async fn insert(
        &self,
        record: &NewPriceHistoryRecord,
    ) -> Result<PriceHistoryRecord, RepositoryError> {
        validate(record)?;

        let row = sqlx::query_as::<_, PriceHistoryRecord>(
            r#"
            INSERT INTO price_history (source_name, price, our_price, observed_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, source_name, price, our_price, observed_at
            "#,
        )
        .bind(&record.source_name)
        .bind(record.price)
        .bind(record.our_price)
        .bind(record.observed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// All rows observed at or after `since`, oldest first
    pub async fn find_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceHistoryRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, PriceHistoryRecord>(
            r#"
            SELECT id, source_name, price, our_price, observed_at
            FROM price_history
            WHERE observed_at >= $1
            ORDER BY observed_at ASC, source_name ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Most recent rows for one competitor, newest first
    pub async fn find_by_source(
        &self,
        source_name: &str,
        limit: i64,
    ) -> Result<Vec<PriceHistoryRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, PriceHistoryRecord>(
            r#"
            SELECT id, source_name, price, our_price, observed_at
            FROM price_history
            WHERE source_name = $1
            ORDER BY observed_at DESC
            LIMIT $2
            "#,
        )
        .bind(source_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Rounds from the last `days` days grouped for charting
    pub async fn history_since(&self, days: i64) -> Result<Vec<HistoryRound>, RepositoryError> {
        if days <= 0 {
            return Err(RepositoryError::InvalidInput(format!(
                "days must be positive, got {}",
                days
            )));
        }

        let records = self.find_since(Utc::now() - Duration::days(days)).await?;
        Ok(HistoryRound::group(&records))
    }

    /// Total number of rows stored
    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl HistoryStore for PriceHistoryRepository {
    async fn append(&self, records: &[NewPriceHistoryRecord]) -> Result<u64, RepositoryError> {
        for record in records {
            validate(record)?;
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO price_history (source_name, price, our_price, observed_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&record.source_name)
            .bind(record.price)
            .bind(record.our_price)
            .bind(record.observed_at)
            .execute(&mut *tx)
            .await?;

            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }
}

fn validate(record: &NewPriceHistoryRecord) -> Result<(), RepositoryError> {
    if record.source_name.trim().is_empty() {
        return Err(RepositoryError::InvalidInput("source_name is empty".to_string()));
    }
    if record.price <= Decimal::ZERO || record.our_price <= Decimal::ZERO {
        return Err(RepositoryError::InvalidInput(format!(
            "prices must be positive (price {}, our_price {})",
            record.price, record.our_price
        )));
    }
    Ok(())
}
