use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FillEvent, Order, OrderStatus, Pair, Result};

/// 24h rolling ticker stats, as returned by `GET /api/v3/ticker/24hr`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ticker24h {
    pub last_price: f64,
    pub quote_volume: f64,
    pub price_change_pct: f64,
}

/// Top-of-book snapshot, derived from `GET /api/v3/depth`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderBookTop {
    pub best_bid: f64,
    pub best_bid_qty: f64,
    pub best_ask: f64,
    pub best_ask_qty: f64,
}

/// Venue acknowledgement for a submitted, queried, or cancelled order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub client_order_id: String,
    pub venue_order_id: Option<String>,
    pub status: OrderStatus,
    pub fills: Vec<FillEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<Balance>,
    pub can_trade: bool,
}

/// Abstraction over the venue connection.
///
/// `gateway::BinanceUsClient` implements this for live trading.
/// `paper::PaperClient` implements this for simulation.
///
/// Only `execution::ExecutionRouter` should hold a reference to a
/// `dyn ExchangeClient`. All signal flow must clear the Risk & Sizing
/// Engine before it reaches the router.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn server_time(&self) -> Result<DateTime<Utc>>;

    async fn ticker_24h(&self, pair: &str) -> Result<Ticker24h>;

    async fn ticker_price(&self, pair: &str) -> Result<f64>;

    async fn klines(&self, pair: &str, interval: &str, limit: u16) -> Result<Vec<crate::Kline>>;

    async fn depth(&self, pair: &str, limit: u16) -> Result<OrderBookTop>;

    async fn exchange_info(&self) -> Result<Vec<Pair>>;

    async fn place_order(&self, order: &Order) -> Result<OrderAck>;

    async fn cancel_order(&self, pair: &str, client_order_id: &str) -> Result<()>;

    async fn get_order(&self, pair: &str, client_order_id: &str) -> Result<OrderAck>;

    async fn open_orders(&self, pair: &str) -> Result<Vec<OrderAck>>;

    async fn my_trades(
        &self,
        pair: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<FillEvent>>;

    async fn account_info(&self) -> Result<AccountInfo>;

    /// Obtain a fresh user-data-stream listen key.
    async fn start_user_stream(&self) -> Result<String>;

    /// Refresh a listen key's 60-minute validity window. Callers must call
    /// this at least once every 30 minutes per spec.md §4.1.
    async fn keepalive_user_stream(&self, listen_key: &str) -> Result<()>;

    async fn close_user_stream(&self, listen_key: &str) -> Result<()>;
}
