use sqlx::SqlitePool;

use common::{OrderSide, Playbook, RejectionReason, Result, Signal, SignalAction, SignalRecord};

use crate::parse_ts;

/// sqlx-backed repository for the `signals` table. Every candidate a
/// playbook emits is recorded here, executed or not, for replay and
/// labelling (spec.md §4.4 "Recording").
pub struct SignalRepo {
    pool: SqlitePool,
}

impl SignalRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &SignalRecord) -> Result<()> {
        self.insert_with_rejection(record, None).await
    }

    pub async fn insert_rejected(&self, record: &SignalRecord, rejection: &RejectionReason) -> Result<()> {
        self.insert_with_rejection(record, Some(rejection)).await
    }

    async fn insert_with_rejection(&self, record: &SignalRecord, rejection: Option<&RejectionReason>) -> Result<()> {
        let signal = &record.signal;
        sqlx::query(
            r#"
            INSERT INTO signals (
                id, pair, playbook, side, entry_price, stop_price, target_price,
                is_event, session_vwap, reason, action, rejection_gate, rejection_reason, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&record.id)
        .bind(&signal.pair)
        .bind(signal.playbook.to_string())
        .bind(signal.side.to_string())
        .bind(signal.entry_price)
        .bind(signal.stop_price)
        .bind(signal.target_price)
        .bind(signal.is_event)
        .bind(signal.session_vwap)
        .bind(&record.reason)
        .bind(action_str(record.action))
        .bind(rejection.map(|r| r.gate.as_str()))
        .bind(rejection.map(|r| r.reason.as_str()))
        .bind(record.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_for_pair(&self, pair: &str, limit: i64) -> Result<Vec<SignalRecord>> {
        let rows = sqlx::query_as::<_, SignalRow>(
            "SELECT * FROM signals WHERE pair = ?1 ORDER BY recorded_at DESC LIMIT ?2",
        )
        .bind(pair)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SignalRow::into_record).collect()
    }
}

fn action_str(action: SignalAction) -> &'static str {
    match action {
        SignalAction::Executed => "EXECUTED",
        SignalAction::Skipped => "SKIPPED",
    }
}

fn parse_action(raw: &str) -> common::Result<SignalAction> {
    Ok(match raw {
        "EXECUTED" => SignalAction::Executed,
        "SKIPPED" => SignalAction::Skipped,
        other => return Err(decode_err("action", other)),
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

fn parse_side(raw: &str) -> common::Result<OrderSide> {
    Ok(match raw {
        "BUY" => OrderSide::Buy,
        "SELL" => OrderSide::Sell,
        other => return Err(decode_err("side", other)),
    })
}

fn decode_err(column: &str, value: &str) -> common::Error {
    common::Error::Database(sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value '{value}'").into(),
    })
}

#[derive(sqlx::FromRow)]
struct SignalRow {
    id: String,
    pair: String,
    playbook: String,
    side: String,
    entry_price: f64,
    stop_price: f64,
    target_price: Option<f64>,
    is_event: bool,
    session_vwap: f64,
    reason: String,
    action: String,
    recorded_at: String,
}

impl SignalRow {
    fn into_record(self) -> Result<SignalRecord> {
        Ok(SignalRecord {
            id: self.id,
            signal: Signal {
                pair: self.pair,
                playbook: parse_playbook(&self.playbook)?,
                side: parse_side(&self.side)?,
                entry_price: self.entry_price,
                stop_price: self.stop_price,
                target_price: self.target_price,
                is_event: self.is_event,
                reason: self.reason.clone(),
                session_vwap: self.session_vwap,
            },
            action: parse_action(&self.action)?,
            reason: self.reason,
            recorded_at: parse_ts(&self.recorded_at)?,
        })
    }
}
