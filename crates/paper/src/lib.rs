use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    AccountInfo, Balance, Error, ExchangeClient, FillEvent, Kline, Order, OrderAck, OrderBookTop,
    OrderSide, OrderStatus, Pair, Result, Ticker24h,
};

/// Simulated exchange client for paper trading.
///
/// All market-data reads (tickers, klines, depth, exchange info) delegate
/// to a real `ExchangeClient` — paper trading should see the same venue
/// reality a live account would. Only the order-placement and account
/// surface is simulated: fills happen immediately at the live mid price
/// plus configurable slippage, and balances/open-order state live in
/// memory only. No real orders ever reach the venue.
pub struct PaperClient {
    inner: Arc<dyn ExchangeClient>,
    slippage_bps: f64,
    balances: RwLock<HashMap<String, f64>>,
    orders: RwLock<HashMap<String, OrderAck>>,
}

impl PaperClient {
    pub fn new(inner: Arc<dyn ExchangeClient>, starting_quote_balance: f64, slippage_bps: f64) -> Self {
        info!(
            starting_quote_balance,
            slippage_bps, "PaperClient initialized"
        );
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), starting_quote_balance);
        Self {
            inner,
            slippage_bps,
            balances: RwLock::new(balances),
            orders: RwLock::new(HashMap::new()),
        }
    }

    fn fill_price(&self, side: OrderSide, mid_price: f64) -> f64 {
        match side {
            OrderSide::Buy => mid_price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid_price * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    pub async fn quote_balance(&self) -> f64 {
        self.balances.read().await.get("USDT").copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn server_time(&self) -> Result<DateTime<Utc>> {
        self.inner.server_time().await
    }

    async fn ticker_24h(&self, pair: &str) -> Result<Ticker24h> {
        self.inner.ticker_24h(pair).await
    }

    async fn ticker_price(&self, pair: &str) -> Result<f64> {
        self.inner.ticker_price(pair).await
    }

    async fn klines(&self, pair: &str, interval: &str, limit: u16) -> Result<Vec<Kline>> {
        self.inner.klines(pair, interval, limit).await
    }

    async fn depth(&self, pair: &str, limit: u16) -> Result<OrderBookTop> {
        self.inner.depth(pair, limit).await
    }

    async fn exchange_info(&self) -> Result<Vec<Pair>> {
        self.inner.exchange_info().await
    }

    async fn place_order(&self, order: &Order) -> Result<OrderAck> {
        let mid_price = self.inner.ticker_price(&order.pair).await?;
        let price = self.fill_price(order.side, mid_price);

        let fill = FillEvent {
            quantity: order.requested_quantity,
            price,
            commission: 0.0,
            commission_asset: "USDT".to_string(),
            trade_id: uuid::Uuid::new_v4().to_string(),
        };

        debug!(
            pair = %order.pair,
            side = %order.side,
            mid = mid_price,
            fill = price,
            qty = order.requested_quantity,
            "paper fill simulated"
        );

        let notional = fill.quantity * fill.price;
        {
            let mut balances = self.balances.write().await;
            let usdt = balances.entry("USDT".to_string()).or_insert(0.0);
            match order.side {
                OrderSide::Buy => *usdt -= notional,
                OrderSide::Sell => *usdt += notional,
            }
        }

        let ack = OrderAck {
            client_order_id: order.client_order_id.clone(),
            venue_order_id: Some(format!("paper-{}", fill.trade_id)),
            status: OrderStatus::Filled,
            fills: vec![fill],
        };
        self.orders.write().await.insert(order.client_order_id.clone(), ack.clone());
        Ok(ack)
    }

    async fn cancel_order(&self, _pair: &str, client_order_id: &str) -> Result<()> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(client_order_id) {
            Some(ack) if !ack.status.is_terminal() => {
                ack.status = OrderStatus::Cancelled;
                Ok(())
            }
            Some(_) => Err(Error::ExecutionError(format!(
                "order {client_order_id} is already in a terminal state"
            ))),
            None => Err(Error::GatewayError {
                status: Some(404),
                venue_code: None,
                message: format!("unknown paper order {client_order_id}"),
            }),
        }
    }

    async fn get_order(&self, _pair: &str, client_order_id: &str) -> Result<OrderAck> {
        self.orders
            .read()
            .await
            .get(client_order_id)
            .cloned()
            .ok_or_else(|| Error::GatewayError {
                status: Some(404),
                venue_code: None,
                message: format!("unknown paper order {client_order_id}"),
            })
    }

    async fn open_orders(&self, pair: &str) -> Result<Vec<OrderAck>> {
        // Paper fills are immediate, so there is never a resting order for
        // a caller to discover here — included for trait completeness.
        let _ = pair;
        Ok(Vec::new())
    }

    async fn my_trades(&self, pair: &str, since: Option<DateTime<Utc>>) -> Result<Vec<FillEvent>> {
        let _ = (pair, since);
        Ok(self.orders.read().await.values().flat_map(|ack| ack.fills.clone()).collect())
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let balances = self
            .balances
            .read()
            .await
            .iter()
            .map(|(asset, free)| Balance {
                asset: asset.clone(),
                free: *free,
                locked: 0.0,
            })
            .collect();
        Ok(AccountInfo { balances, can_trade: true })
    }

    async fn start_user_stream(&self) -> Result<String> {
        Ok("paper-listen-key".to_string())
    }

    async fn keepalive_user_stream(&self, _listen_key: &str) -> Result<()> {
        Ok(())
    }

    async fn close_user_stream(&self, _listen_key: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{Error as CommonError, OrderType};

    /// A market-data stub returning a fixed price for every pair, so these
    /// tests exercise only the simulated order/account surface.
    struct FixedPriceClient {
        price: f64,
    }

    #[async_trait]
    impl ExchangeClient for FixedPriceClient {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn server_time(&self) -> Result<DateTime<Utc>> {
            Ok(Utc::now())
        }
        async fn ticker_24h(&self, _pair: &str) -> Result<Ticker24h> {
            Ok(Ticker24h { last_price: self.price, quote_volume: 0.0, price_change_pct: 0.0 })
        }
        async fn ticker_price(&self, _pair: &str) -> Result<f64> {
            Ok(self.price)
        }
        async fn klines(&self, _pair: &str, _interval: &str, _limit: u16) -> Result<Vec<Kline>> {
            Ok(Vec::new())
        }
        async fn depth(&self, _pair: &str, _limit: u16) -> Result<OrderBookTop> {
            Ok(OrderBookTop { best_bid: self.price, best_bid_qty: 1.0, best_ask: self.price, best_ask_qty: 1.0 })
        }
        async fn exchange_info(&self) -> Result<Vec<Pair>> {
            Ok(Vec::new())
        }
        async fn place_order(&self, _order: &Order) -> Result<OrderAck> {
            unreachable!("PaperClient never delegates order placement")
        }
        async fn cancel_order(&self, _pair: &str, _client_order_id: &str) -> Result<()> {
            unreachable!()
        }
        async fn get_order(&self, _pair: &str, _client_order_id: &str) -> Result<OrderAck> {
            unreachable!()
        }
        async fn open_orders(&self, _pair: &str) -> Result<Vec<OrderAck>> {
            Ok(Vec::new())
        }
        async fn my_trades(&self, _pair: &str, _since: Option<DateTime<Utc>>) -> Result<Vec<FillEvent>> {
            Ok(Vec::new())
        }
        async fn account_info(&self) -> Result<AccountInfo> {
            unreachable!()
        }
        async fn start_user_stream(&self) -> Result<String> {
            Ok("stub".to_string())
        }
        async fn keepalive_user_stream(&self, _listen_key: &str) -> Result<()> {
            Ok(())
        }
        async fn close_user_stream(&self, _listen_key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn order(side: OrderSide, quantity: f64) -> Order {
        Order::new("client-1", "BTCUSDT", side, OrderType::Market, quantity, None)
    }

    #[tokio::test]
    async fn buy_fill_applies_positive_slippage() {
        let inner = Arc::new(FixedPriceClient { price: 1000.0 });
        let client = PaperClient::new(inner, 10_000.0, 10.0);

        let ack = client.place_order(&order(OrderSide::Buy, 0.01)).await.unwrap();
        let expected = 1000.0 * (1.0 + 10.0 / 10_000.0);
        assert!((ack.fills[0].price - expected).abs() < 1e-6);
        assert_eq!(ack.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn sell_fill_applies_negative_slippage() {
        let inner = Arc::new(FixedPriceClient { price: 1000.0 });
        let client = PaperClient::new(inner, 10_000.0, 10.0);

        let ack = client.place_order(&order(OrderSide::Sell, 0.01)).await.unwrap();
        let expected = 1000.0 * (1.0 - 10.0 / 10_000.0);
        assert!((ack.fills[0].price - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn buy_decrements_quote_balance() {
        let inner = Arc::new(FixedPriceClient { price: 1000.0 });
        let client = PaperClient::new(inner, 10_000.0, 0.0);

        client.place_order(&order(OrderSide::Buy, 1.0)).await.unwrap();
        assert!((client.quote_balance().await - 9_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn get_order_returns_the_placed_order() {
        let inner = Arc::new(FixedPriceClient { price: 500.0 });
        let client = PaperClient::new(inner, 10_000.0, 0.0);

        let placed = client.place_order(&order(OrderSide::Buy, 1.0)).await.unwrap();
        let fetched = client.get_order("BTCUSDT", &placed.client_order_id).await.unwrap();
        assert_eq!(fetched.client_order_id, placed.client_order_id);
    }

    #[tokio::test]
    async fn cancel_of_filled_order_errors() {
        let inner = Arc::new(FixedPriceClient { price: 500.0 });
        let client = PaperClient::new(inner, 10_000.0, 0.0);

        let placed = client.place_order(&order(OrderSide::Buy, 1.0)).await.unwrap();
        let err = client.cancel_order("BTCUSDT", &placed.client_order_id).await.unwrap_err();
        assert!(matches!(err, CommonError::ExecutionError(_)));
    }
}
