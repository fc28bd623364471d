use chrono::Utc;
use sqlx::SqlitePool;

use common::{Pair, Result};

use crate::parse_ts;

/// sqlx-backed repository for the daily-refreshed `pairs` filter cache.
pub struct PairRepo {
    pool: SqlitePool,
}

impl PairRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the entire cache with a fresh `exchange_info` snapshot inside
    /// one transaction, so readers never see a half-refreshed universe.
    pub async fn replace_all(&self, pairs: &[Pair]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pairs").execute(&mut *tx).await?;

        let refreshed_at = Utc::now().to_rfc3339();
        for pair in pairs {
            sqlx::query(
                r#"
                INSERT INTO pairs (
                    symbol, base_asset, quote_asset, tick_size, step_size,
                    min_qty, max_qty, min_price, max_price, min_notional, refreshed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(&pair.symbol)
            .bind(&pair.base_asset)
            .bind(&pair.quote_asset)
            .bind(&pair.tick_size)
            .bind(&pair.step_size)
            .bind(pair.min_qty)
            .bind(pair.max_qty)
            .bind(pair.min_price)
            .bind(pair.max_price)
            .bind(pair.min_notional)
            .bind(&refreshed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, symbol: &str) -> Result<Option<Pair>> {
        let row = sqlx::query_as::<_, PairRow>("SELECT * FROM pairs WHERE symbol = ?1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PairRow::into_pair).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Pair>> {
        let rows = sqlx::query_as::<_, PairRow>("SELECT * FROM pairs")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(PairRow::into_pair).collect()
    }
}

#[derive(sqlx::FromRow)]
struct PairRow {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    tick_size: String,
    step_size: String,
    min_qty: f64,
    max_qty: f64,
    min_price: f64,
    max_price: f64,
    min_notional: f64,
    refreshed_at: String,
}

impl PairRow {
    fn into_pair(self) -> Result<Pair> {
        // refreshed_at is cache metadata only, not part of `Pair` itself;
        // parse it anyway to surface a corrupt row early.
        parse_ts(&self.refreshed_at)?;
        Ok(Pair {
            symbol: self.symbol,
            base_asset: self.base_asset,
            quote_asset: self.quote_asset,
            tick_size: self.tick_size,
            step_size: self.step_size,
            min_qty: self.min_qty,
            max_qty: self.max_qty,
            min_price: self.min_price,
            max_price: self.max_price,
            min_notional: self.min_notional,
        })
    }
}
