use sqlx::SqlitePool;

use common::{CloseReason, Playbook, Position, PositionSide, PositionStatus, Result};

use crate::{parse_ts, parse_ts_opt};

/// sqlx-backed repository for the `positions` table.
pub struct PositionRepo {
    pool: SqlitePool,
}

impl PositionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, pair, side, playbook, entry_order_id, entry_price,
                current_price, stop_price, target_price, quantity,
                unrealized_pnl, status, opened_at, closed_at, close_reason, realized_pnl
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&position.id)
        .bind(&position.pair)
        .bind(side_str(position.side))
        .bind(position.playbook.to_string())
        .bind(&position.entry_order_id)
        .bind(position.entry_price)
        .bind(position.current_price)
        .bind(position.stop_price)
        .bind(position.target_price)
        .bind(position.quantity)
        .bind(position.unrealized_pnl)
        .bind(status_str(position.status))
        .bind(position.opened_at.to_rfc3339())
        .bind(position.closed_at.map(|t| t.to_rfc3339()))
        .bind(position.close_reason.map(close_reason_str))
        .bind(position.realized_pnl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the mutable fields of a position (mark-to-market, close).
    pub async fn update(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                current_price = ?2, stop_price = ?3, target_price = ?4,
                unrealized_pnl = ?5, status = ?6, closed_at = ?7,
                close_reason = ?8, realized_pnl = ?9
            WHERE id = ?1
            "#,
        )
        .bind(&position.id)
        .bind(position.current_price)
        .bind(position.stop_price)
        .bind(position.target_price)
        .bind(position.unrealized_pnl)
        .bind(status_str(position.status))
        .bind(position.closed_at.map(|t| t.to_rfc3339()))
        .bind(position.close_reason.map(close_reason_str))
        .bind(position.realized_pnl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_open(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM positions WHERE status IN ('OPEN','CLOSING')",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PositionRow::into_position).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<Position>> {
        let row = sqlx::query_as::<_, PositionRow>("SELECT * FROM positions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PositionRow::into_position).transpose()
    }
}

fn side_str(side: PositionSide) -> &'static str {
    match side {
        PositionSide::Long => "LONG",
        PositionSide::Short => "SHORT",
    }
}

fn parse_side(raw: &str) -> common::Result<PositionSide> {
    Ok(match raw {
        "LONG" => PositionSide::Long,
        "SHORT" => PositionSide::Short,
        other => return Err(decode_err("side", other)),
    })
}

fn status_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Open => "OPEN",
        PositionStatus::Closing => "CLOSING",
        PositionStatus::Closed => "CLOSED",
    }
}

fn parse_status(raw: &str) -> common::Result<PositionStatus> {
    Ok(match raw {
        "OPEN" => PositionStatus::Open,
        "CLOSING" => PositionStatus::Closing,
        "CLOSED" => PositionStatus::Closed,
        other => return Err(decode_err("status", other)),
    })
}

fn parse_playbook(raw: &str) -> common::Result<Playbook> {
    Ok(match raw {
        "A" => Playbook::A,
        "B" => Playbook::B,
        "C" => Playbook::C,
        "D" => Playbook::D,
        other => return Err(decode_err("playbook", other)),
    })
}

fn close_reason_str(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::StopLoss => "STOP_LOSS",
        CloseReason::Target => "TARGET",
        CloseReason::Manual => "MANUAL",
        CloseReason::KillSwitch => "KILL_SWITCH",
        CloseReason::TimeStop => "TIME_STOP",
    }
}

fn parse_close_reason(raw: &str) -> common::Result<CloseReason> {
    Ok(match raw {
        "STOP_LOSS" => CloseReason::StopLoss,
        "TARGET" => CloseReason::Target,
        "MANUAL" => CloseReason::Manual,
        "KILL_SWITCH" => CloseReason::KillSwitch,
        "TIME_STOP" => CloseReason::TimeStop,
        other => return Err(decode_err("close_reason", other)),
    })
}

fn decode_err(column: &str, value: &str) -> common::Error {
    common::Error::Database(sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value '{value}'").into(),
    })
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    id: String,
    pair: String,
    side: String,
    playbook: String,
    entry_order_id: String,
    entry_price: f64,
    current_price: f64,
    stop_price: f64,
    target_price: Option<f64>,
    quantity: f64,
    unrealized_pnl: f64,
    status: String,
    opened_at: String,
    closed_at: Option<String>,
    close_reason: Option<String>,
    realized_pnl: Option<f64>,
}

impl PositionRow {
    fn into_position(self) -> Result<Position> {
        Ok(Position {
            id: self.id,
            pair: self.pair,
            side: parse_side(&self.side)?,
            playbook: parse_playbook(&self.playbook)?,
            entry_order_id: self.entry_order_id,
            entry_price: self.entry_price,
            current_price: self.current_price,
            stop_price: self.stop_price,
            target_price: self.target_price,
            quantity: self.quantity,
            unrealized_pnl: self.unrealized_pnl,
            status: parse_status(&self.status)?,
            opened_at: parse_ts(&self.opened_at)?,
            closed_at: parse_ts_opt(self.closed_at.as_deref())?,
            close_reason: self.close_reason.as_deref().map(parse_close_reason).transpose()?,
            realized_pnl: self.realized_pnl,
        })
    }
}
