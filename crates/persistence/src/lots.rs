use chrono::Utc;
use sqlx::SqlitePool;

use common::{Lot, LotStatus, Result};

use crate::parse_ts;

/// sqlx-backed repository for the `lots` table (tax-lot tracking, spec.md
/// §3/§4.6). Lot ids follow `LOT-YYYYMMDD-NNN`, sequential per UTC day.
pub struct LotRepo {
    pool: SqlitePool,
}

impl LotRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Allocate the next `LOT-YYYYMMDD-NNN` id for today, scanning existing
    /// ids with today's date prefix rather than a separate counter table.
    pub async fn next_lot_id(&self) -> Result<String> {
        let today = Utc::now().format("%Y%m%d").to_string();
        let prefix = format!("LOT-{today}-");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lots WHERE id LIKE ?1")
            .bind(format!("{prefix}%"))
            .fetch_one(&self.pool)
            .await?;
        Ok(format!("{prefix}{:03}", count + 1))
    }

    pub async fn insert(&self, lot: &Lot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lots (
                id, pair, acquired_at, quantity, cost_per_unit,
                remaining_quantity, status, order_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&lot.id)
        .bind(&lot.pair)
        .bind(lot.acquired_at.to_rfc3339())
        .bind(lot.quantity)
        .bind(lot.cost_per_unit)
        .bind(lot.remaining_quantity)
        .bind(status_str(lot.status))
        .bind(&lot.order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update `remaining_quantity`/`status` as a lot is consumed on exit.
    pub async fn update_remaining(&self, id: &str, remaining_quantity: f64, status: LotStatus) -> Result<()> {
        sqlx::query("UPDATE lots SET remaining_quantity = ?2, status = ?3 WHERE id = ?1")
            .bind(id)
            .bind(remaining_quantity)
            .bind(status_str(status))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Open lots for a pair, oldest first — FIFO consumption order.
    pub async fn open_lots_for_pair(&self, pair: &str) -> Result<Vec<Lot>> {
        let rows = sqlx::query_as::<_, LotRow>(
            "SELECT * FROM lots WHERE pair = ?1 AND status = 'OPEN' ORDER BY acquired_at ASC",
        )
        .bind(pair)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LotRow::into_lot).collect()
    }
}

fn status_str(status: LotStatus) -> &'static str {
    match status {
        LotStatus::Open => "OPEN",
        LotStatus::Closed => "CLOSED",
    }
}

fn parse_status(raw: &str) -> common::Result<LotStatus> {
    Ok(match raw {
        "OPEN" => LotStatus::Open,
        "CLOSED" => LotStatus::Closed,
        other => {
            return Err(common::Error::Database(sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: format!("unknown lot status '{other}'").into(),
            }))
        }
    })
}

#[derive(sqlx::FromRow)]
struct LotRow {
    id: String,
    pair: String,
    acquired_at: String,
    quantity: f64,
    cost_per_unit: f64,
    remaining_quantity: f64,
    status: String,
    order_id: String,
}

impl LotRow {
    fn into_lot(self) -> Result<Lot> {
        Ok(Lot {
            id: self.id,
            pair: self.pair,
            acquired_at: parse_ts(&self.acquired_at)?,
            quantity: self.quantity,
            cost_per_unit: self.cost_per_unit,
            remaining_quantity: self.remaining_quantity,
            status: parse_status(&self.status)?,
            order_id: self.order_id,
        })
    }
}
