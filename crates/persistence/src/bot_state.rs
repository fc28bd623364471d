use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use common::{BotState, BotStatus, Error, Result};

use crate::parse_ts_opt;

/// sqlx-backed repository for the single-row `bot_state` table (id = 1).
pub struct BotStateRepo {
    pool: SqlitePool,
}

impl BotStateRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the persisted state, or `None` if the row has never been seeded.
    pub async fn load(&self) -> Result<Option<BotState>> {
        let row = sqlx::query_as::<_, BotStateRow>("SELECT * FROM bot_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(BotStateRow::into_state).transpose()
    }

    pub async fn save(&self, state: &BotState) -> Result<()> {
        let last_signal_at_json = serde_json::to_string(&state.last_signal_at)?;
        let playbook_b_session_counts_json = serde_json::to_string(&state.playbook_b_session_counts)?;

        sqlx::query(
            r#"
            INSERT INTO bot_state (
                id, status, starting_equity, current_equity, peak_equity,
                daily_pnl_usd, daily_pnl_r, weekly_pnl_usd, weekly_pnl_r,
                last_scan_at, last_signal_at_json, playbook_b_session_counts_json,
                session_day
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                starting_equity = excluded.starting_equity,
                current_equity = excluded.current_equity,
                peak_equity = excluded.peak_equity,
                daily_pnl_usd = excluded.daily_pnl_usd,
                daily_pnl_r = excluded.daily_pnl_r,
                weekly_pnl_usd = excluded.weekly_pnl_usd,
                weekly_pnl_r = excluded.weekly_pnl_r,
                last_scan_at = excluded.last_scan_at,
                last_signal_at_json = excluded.last_signal_at_json,
                playbook_b_session_counts_json = excluded.playbook_b_session_counts_json,
                session_day = excluded.session_day
            "#,
        )
        .bind(status_str(state.status))
        .bind(state.starting_equity)
        .bind(state.current_equity)
        .bind(state.peak_equity)
        .bind(state.daily_pnl_usd)
        .bind(state.daily_pnl_r)
        .bind(state.weekly_pnl_usd)
        .bind(state.weekly_pnl_r)
        .bind(state.last_scan_at.map(|t| t.to_rfc3339()))
        .bind(last_signal_at_json)
        .bind(playbook_b_session_counts_json)
        .bind(state.session_day.map(|d| d.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn status_str(status: BotStatus) -> &'static str {
    match status {
        BotStatus::Running => "RUNNING",
        BotStatus::HaltedDaily => "HALTED_DAILY",
        BotStatus::HaltedWeekly => "HALTED_WEEKLY",
    }
}

fn parse_status(raw: &str) -> common::Result<BotStatus> {
    Ok(match raw {
        "RUNNING" => BotStatus::Running,
        "HALTED_DAILY" => BotStatus::HaltedDaily,
        "HALTED_WEEKLY" => BotStatus::HaltedWeekly,
        other => {
            return Err(Error::Database(sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: format!("unknown bot status '{other}'").into(),
            }))
        }
    })
}

#[derive(sqlx::FromRow)]
struct BotStateRow {
    status: String,
    starting_equity: f64,
    current_equity: f64,
    peak_equity: f64,
    daily_pnl_usd: f64,
    daily_pnl_r: f64,
    weekly_pnl_usd: f64,
    weekly_pnl_r: f64,
    last_scan_at: Option<String>,
    last_signal_at_json: String,
    playbook_b_session_counts_json: String,
    session_day: Option<String>,
}

impl BotStateRow {
    fn into_state(self) -> Result<BotState> {
        let last_signal_at: HashMap<String, DateTime<Utc>> =
            serde_json::from_str(&self.last_signal_at_json)?;
        let playbook_b_session_counts: HashMap<String, u32> =
            serde_json::from_str(&self.playbook_b_session_counts_json)?;
        let session_day = self
            .session_day
            .as_deref()
            .map(|d| d.parse::<chrono::NaiveDate>())
            .transpose()
            .map_err(|e| Error::Database(sqlx::Error::ColumnDecode {
                index: "session_day".to_string(),
                source: e.into(),
            }))?;

        Ok(BotState {
            status: parse_status(&self.status)?,
            starting_equity: self.starting_equity,
            current_equity: self.current_equity,
            peak_equity: self.peak_equity,
            daily_pnl_usd: self.daily_pnl_usd,
            daily_pnl_r: self.daily_pnl_r,
            weekly_pnl_usd: self.weekly_pnl_usd,
            weekly_pnl_r: self.weekly_pnl_r,
            last_scan_at: parse_ts_opt(self.last_scan_at.as_deref())?,
            last_signal_at,
            playbook_b_session_counts,
            session_day,
            playbook_trade_r: HashMap::new(),
        })
    }
}
