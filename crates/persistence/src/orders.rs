use sqlx::SqlitePool;

use common::{
    FillEvent, Order, OrderEvidence, OrderSide, OrderStatus, OrderType, Result,
};

use crate::{parse_ts, parse_ts_opt};

/// sqlx-backed repository for the `orders` and `fills` tables. One order
/// owns zero or more fill rows; both are written inside the same
/// transaction so a crash never leaves an order without its fills.
pub struct OrderRepo {
    pool: SqlitePool,
}

impl OrderRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a brand-new order (status `PENDING`). Fails closed on a
    /// `client_order_id` collision rather than overwriting — the spec.md §3
    /// invariant this repo must never violate.
    pub async fn insert(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                client_order_id, venue_order_id, pair, side, order_type,
                requested_quantity, requested_price, filled_quantity,
                avg_fill_price, fees, status,
                evidence_request, evidence_response, evidence_rejection_reason,
                submitted_at, filled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&order.client_order_id)
        .bind(&order.venue_order_id)
        .bind(&order.pair)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.requested_quantity)
        .bind(order.requested_price)
        .bind(order.filled_quantity)
        .bind(order.avg_fill_price)
        .bind(order.fees)
        .bind(status_str(order.status))
        .bind(&order.evidence.request)
        .bind(&order.evidence.response)
        .bind(&order.evidence.rejection_reason)
        .bind(order.submitted_at.to_rfc3339())
        .bind(order.filled_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite an order's mutable fields (status, fill accumulation,
    /// evidence) and replace its fill rows wholesale — `Order::fills` is
    /// always the full authoritative list by the time this is called.
    pub async fn update(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE orders SET
                venue_order_id = ?2, filled_quantity = ?3, avg_fill_price = ?4,
                fees = ?5, status = ?6, evidence_request = ?7,
                evidence_response = ?8, evidence_rejection_reason = ?9, filled_at = ?10
            WHERE client_order_id = ?1
            "#,
        )
        .bind(&order.client_order_id)
        .bind(&order.venue_order_id)
        .bind(order.filled_quantity)
        .bind(order.avg_fill_price)
        .bind(order.fees)
        .bind(status_str(order.status))
        .bind(&order.evidence.request)
        .bind(&order.evidence.response)
        .bind(&order.evidence.rejection_reason)
        .bind(order.filled_at.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM fills WHERE client_order_id = ?1")
            .bind(&order.client_order_id)
            .execute(&mut *tx)
            .await?;

        for fill in &order.fills {
            sqlx::query(
                r#"
                INSERT INTO fills (client_order_id, quantity, price, commission, commission_asset, trade_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&order.client_order_id)
            .bind(fill.quantity)
            .bind(fill.price)
            .bind(fill.commission)
            .bind(&fill.commission_asset)
            .bind(&fill.trade_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, client_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE client_order_id = ?1",
        )
        .bind(client_order_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let fills = self.fills_for(client_order_id).await?;
        Some(row.into_order(fills)).transpose()
    }

    pub async fn open_orders(&self, pair: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE pair = ?1 AND status IN ('PENDING','OPEN','PARTIALLY_FILLED')",
        )
        .bind(pair)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let fills = self.fills_for(&row.client_order_id).await?;
            orders.push(row.into_order(fills)?);
        }
        Ok(orders)
    }

    async fn fills_for(&self, client_order_id: &str) -> Result<Vec<FillEvent>> {
        let rows = sqlx::query_as::<_, FillRow>(
            "SELECT quantity, price, commission, commission_asset, trade_id FROM fills WHERE client_order_id = ?1",
        )
        .bind(client_order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FillRow::into_fill).collect())
    }
}

fn status_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "PENDING",
        OrderStatus::Open => "OPEN",
        OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
        OrderStatus::Filled => "FILLED",
        OrderStatus::Cancelled => "CANCELLED",
        OrderStatus::Rejected => "REJECTED",
    }
}

fn parse_status(raw: &str) -> common::Result<OrderStatus> {
    Ok(match raw {
        "PENDING" => OrderStatus::Pending,
        "OPEN" => OrderStatus::Open,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELLED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        other => return Err(common::Error::Database(sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: format!("unknown order status '{other}'").into(),
        })),
    })
}

fn parse_side(raw: &str) -> common::Result<OrderSide> {
    Ok(match raw {
        "BUY" => OrderSide::Buy,
        "SELL" => OrderSide::Sell,
        other => return Err(common::Error::Database(sqlx::Error::ColumnDecode {
            index: "side".to_string(),
            source: format!("unknown order side '{other}'").into(),
        })),
    })
}

fn parse_order_type(raw: &str) -> common::Result<OrderType> {
    Ok(match raw {
        "LIMIT_MAKER" => OrderType::LimitMaker,
        "MARKET" => OrderType::Market,
        "LIMIT" => OrderType::Limit,
        "STOP_LOSS_LIMIT" => OrderType::StopLossLimit,
        other => return Err(common::Error::Database(sqlx::Error::ColumnDecode {
            index: "order_type".to_string(),
            source: format!("unknown order type '{other}'").into(),
        })),
    })
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    client_order_id: String,
    venue_order_id: Option<String>,
    pair: String,
    side: String,
    order_type: String,
    requested_quantity: f64,
    requested_price: Option<f64>,
    filled_quantity: f64,
    avg_fill_price: f64,
    fees: f64,
    status: String,
    evidence_request: Option<String>,
    evidence_response: Option<String>,
    evidence_rejection_reason: Option<String>,
    submitted_at: String,
    filled_at: Option<String>,
}

impl OrderRow {
    fn into_order(self, fills: Vec<FillEvent>) -> Result<Order> {
        Ok(Order {
            client_order_id: self.client_order_id,
            venue_order_id: self.venue_order_id,
            pair: self.pair,
            side: parse_side(&self.side)?,
            order_type: parse_order_type(&self.order_type)?,
            requested_quantity: self.requested_quantity,
            requested_price: self.requested_price,
            filled_quantity: self.filled_quantity,
            avg_fill_price: self.avg_fill_price,
            fees: self.fees,
            status: parse_status(&self.status)?,
            evidence: OrderEvidence {
                request: self.evidence_request,
                response: self.evidence_response,
                rejection_reason: self.evidence_rejection_reason,
            },
            fills,
            submitted_at: parse_ts(&self.submitted_at)?,
            filled_at: parse_ts_opt(self.filled_at.as_deref())?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FillRow {
    quantity: f64,
    price: f64,
    commission: f64,
    commission_asset: String,
    trade_id: String,
}

impl FillRow {
    fn into_fill(self) -> FillEvent {
        FillEvent {
            quantity: self.quantity,
            price: self.price,
            commission: self.commission,
            commission_asset: self.commission_asset,
            trade_id: self.trade_id,
        }
    }
}
