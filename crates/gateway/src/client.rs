use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use common::{
    AccountInfo, Balance, Error, ExchangeClient, FillEvent, Kline, Order, OrderAck, OrderBookTop,
    OrderStatus, Pair, Result, Ticker24h,
};

use crate::backoff::{is_retryable, venue_retry_delay, MAX_VENUE_RETRIES};
use crate::cache::TtlCache;
use crate::clock::ClockSync;
use crate::ratelimit::{OrderLimiter, WeightLimiter};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.binance.us";
const RECV_WINDOW_MS: i64 = 5_000;

/// Signed + rate-limited REST client for a Binance-compatible spot venue.
/// The single `ExchangeClient` implementation used for live trading;
/// `paper::PaperClient` stands in for it during dry runs.
pub struct BinanceUsClient {
    api_key: String,
    api_secret: String,
    base_url: String,
    http: Client,
    clock: ClockSync,
    weight_limiter: WeightLimiter,
    order_limiter: OrderLimiter,
    exchange_info_cache: TtlCache<Vec<Pair>>,
}

impl BinanceUsClient {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            base_url: base_url.into(),
            http: Client::builder()
                .use_rustls_tls()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
            clock: ClockSync::new(),
            // Binance-family weight budget: 1200/minute.
            weight_limiter: WeightLimiter::new(1200, Duration::from_secs(60)),
            // Binance-family order budget: 10/second.
            order_limiter: OrderLimiter::new(10),
            exchange_info_cache: TtlCache::new(Duration::from_secs(86_400)),
        }
    }

    pub fn with_default_base_url(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self::new(api_key, api_secret, DEFAULT_BASE_URL)
    }

    /// Refresh `self.clock`'s offset against the venue's server time. Should
    /// be called at boot and on a periodic timer by the caller.
    pub async fn sync_clock(&self) -> Result<()> {
        let before = Utc::now().timestamp_millis();
        let server_time = self.server_time().await?;
        let after = Utc::now().timestamp_millis();
        let round_trip_mid = (before + after) / 2;
        self.clock
            .set_offset(server_time.timestamp_millis() - round_trip_mid);
        Ok(())
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Execute an unsigned public request with weight accounting and
    /// jittered retry on transient failures.
    async fn public_request(&self, method: Method, path: &str, query: &[(&str, String)], weight: u32) -> Result<String> {
        let _permit = self.weight_limiter.acquire(weight).await;
        let url = format!("{}{}", self.base_url, path);
        let qs = serde_urlencoded::to_string(query).map_err(|e| Error::Other(e.to_string()))?;
        let full_url = if qs.is_empty() { url } else { format!("{url}?{qs}") };
        self.send_with_retry(method, full_url, None).await
    }

    /// Execute a signed request (query params + timestamp + signature).
    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
        weight: u32,
    ) -> Result<String> {
        // spec.md §4.1 step 1: re-sync the clock before stamping a signed
        // request whenever the last sync is more than 60s old.
        if self.clock.is_stale() {
            if let Err(e) = self.sync_clock().await {
                warn!(error = %e, "clock sync failed, signing with stale offset");
            }
        }

        let _permit = self.weight_limiter.acquire(weight).await;
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", self.clock.timestamp_ms().to_string()));

        let query = serde_urlencoded::to_string(&params).map_err(|e| Error::Other(e.to_string()))?;
        let signature = self.sign(&query);
        let url = format!("{}{}", self.base_url, path);

        let (url, body) = match method {
            Method::GET | Method::DELETE => (format!("{url}?{query}&signature={signature}"), None),
            _ => (url, Some(format!("{query}&signature={signature}"))),
        };

        self.send_with_retry(method, url, body).await
    }

    async fn send_with_retry(&self, method: Method, url: String, body: Option<String>) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("X-MBX-APIKEY", &self.api_key);
            if let Some(b) = &body {
                req = req
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(b.clone());
            }

            let resp = req.send().await.map_err(Error::Http)?;
            let status = resp.status();

            if let Some(used) = resp
                .headers()
                .get("x-mbx-used-weight-1m")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u32>().ok())
            {
                self.weight_limiter.sync_used(used).await;
            }

            let text = resp.text().await.map_err(Error::Http)?;

            if status.is_success() {
                return Ok(text);
            }

            let venue_code = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("code").and_then(|c| c.as_i64()));

            // spec.md §4.1: a 429 or venue code -1003 halts the general
            // limiter for 60s without dropping queued work.
            if status.as_u16() == 429 || venue_code == Some(-1003) {
                self.weight_limiter.halt(Duration::from_secs(60)).await;
            }

            if is_retryable(status.as_u16(), venue_code) && attempt < MAX_VENUE_RETRIES {
                warn!(
                    status = status.as_u16(),
                    venue_code,
                    attempt,
                    url = %url,
                    "transient venue error, retrying"
                );
                tokio::time::sleep(venue_retry_delay(attempt)).await;
                attempt += 1;
                continue;
            }

            return Err(Error::GatewayError {
                status: Some(status.as_u16()),
                venue_code,
                message: text,
            });
        }
    }
}

#[async_trait]
impl ExchangeClient for BinanceUsClient {
    async fn ping(&self) -> Result<()> {
        self.public_request(Method::GET, "/api/v3/ping", &[], 1).await?;
        Ok(())
    }

    async fn server_time(&self) -> Result<DateTime<Utc>> {
        let body = self.public_request(Method::GET, "/api/v3/time", &[], 1).await?;
        let resp: ServerTimeResponse = serde_json::from_str(&body)?;
        Ok(Utc
            .timestamp_millis_opt(resp.server_time)
            .single()
            .unwrap_or_else(Utc::now))
    }

    async fn ticker_24h(&self, pair: &str) -> Result<Ticker24h> {
        let body = self
            .public_request(Method::GET, "/api/v3/ticker/24hr", &[("symbol", pair.to_string())], 1)
            .await?;
        let resp: Ticker24hResponse = serde_json::from_str(&body)?;
        Ok(Ticker24h {
            last_price: resp.last_price.parse().unwrap_or(0.0),
            quote_volume: resp.quote_volume.parse().unwrap_or(0.0),
            price_change_pct: resp.price_change_percent.parse().unwrap_or(0.0),
        })
    }

    async fn ticker_price(&self, pair: &str) -> Result<f64> {
        let body = self
            .public_request(Method::GET, "/api/v3/ticker/price", &[("symbol", pair.to_string())], 1)
            .await?;
        let resp: PriceTickerResponse = serde_json::from_str(&body)?;
        resp.price
            .parse::<f64>()
            .map_err(|e| Error::Other(format!("unparseable price: {e}")))
    }

    async fn klines(&self, pair: &str, interval: &str, limit: u16) -> Result<Vec<Kline>> {
        let body = self
            .public_request(
                Method::GET,
                "/api/v3/klines",
                &[
                    ("symbol", pair.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
                klines_weight(limit),
            )
            .await?;
        let raw: Vec<RawKline> = serde_json::from_str(&body)?;
        Ok(raw.into_iter().map(RawKline::into_kline).collect())
    }

    async fn depth(&self, pair: &str, limit: u16) -> Result<OrderBookTop> {
        let body = self
            .public_request(
                Method::GET,
                "/api/v3/depth",
                &[("symbol", pair.to_string()), ("limit", limit.to_string())],
                1,
            )
            .await?;
        let resp: DepthResponse = serde_json::from_str(&body)?;
        let (best_bid, best_bid_qty) = resp
            .bids
            .first()
            .map(|[p, q]| (p.parse().unwrap_or(0.0), q.parse().unwrap_or(0.0)))
            .unwrap_or((0.0, 0.0));
        let (best_ask, best_ask_qty) = resp
            .asks
            .first()
            .map(|[p, q]| (p.parse().unwrap_or(0.0), q.parse().unwrap_or(0.0)))
            .unwrap_or((0.0, 0.0));
        Ok(OrderBookTop {
            best_bid,
            best_bid_qty,
            best_ask,
            best_ask_qty,
        })
    }

    async fn exchange_info(&self) -> Result<Vec<Pair>> {
        if let Some(cached) = self.exchange_info_cache.get().await {
            return Ok(cached);
        }
        let body = self
            .public_request(Method::GET, "/api/v3/exchangeInfo", &[], 1)
            .await?;
        let resp: ExchangeInfoResponse = serde_json::from_str(&body)?;
        let pairs: Vec<Pair> = resp.symbols.into_iter().filter_map(symbol_to_pair).collect();
        self.exchange_info_cache.set(pairs.clone()).await;
        Ok(pairs)
    }

    async fn place_order(&self, order: &Order) -> Result<OrderAck> {
        let _order_permit = self.order_limiter.acquire().await;

        let mut params = vec![
            ("symbol", order.pair.clone()),
            ("side", order.side.to_string()),
            ("type", order.order_type.to_string()),
            ("quantity", format!("{}", order.requested_quantity)),
            ("newClientOrderId", order.client_order_id.clone()),
        ];
        if let Some(price) = order.requested_price {
            params.push(("price", format!("{price}")));
            params.push(("timeInForce", "GTC".to_string()));
        }

        debug!(pair = %order.pair, side = %order.side, order_type = %order.order_type, "submitting order");
        let body = self.signed_request(Method::POST, "/api/v3/order", params, 1).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;
        Ok(resp.into_ack())
    }

    async fn cancel_order(&self, pair: &str, client_order_id: &str) -> Result<()> {
        let params = vec![
            ("symbol", pair.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
        ];
        self.signed_request(Method::DELETE, "/api/v3/order", params, 1).await?;
        Ok(())
    }

    async fn get_order(&self, pair: &str, client_order_id: &str) -> Result<OrderAck> {
        let params = vec![
            ("symbol", pair.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
        ];
        let body = self.signed_request(Method::GET, "/api/v3/order", params, 1).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;
        Ok(resp.into_ack())
    }

    async fn open_orders(&self, pair: &str) -> Result<Vec<OrderAck>> {
        let params = vec![("symbol", pair.to_string())];
        let body = self.signed_request(Method::GET, "/api/v3/openOrders", params, 1).await?;
        let resp: Vec<OrderResponse> = serde_json::from_str(&body)?;
        Ok(resp.into_iter().map(OrderResponse::into_ack).collect())
    }

    async fn my_trades(&self, pair: &str, since: Option<DateTime<Utc>>) -> Result<Vec<FillEvent>> {
        let mut params = vec![("symbol", pair.to_string())];
        if let Some(ts) = since {
            params.push(("startTime", ts.timestamp_millis().to_string()));
        }
        let body = self.signed_request(Method::GET, "/api/v3/myTrades", params, 10).await?;
        let resp: Vec<TradeResponse> = serde_json::from_str(&body)?;
        Ok(resp.into_iter().map(TradeResponse::into_fill).collect())
    }

    async fn account_info(&self) -> Result<AccountInfo> {
        let body = self.signed_request(Method::GET, "/api/v3/account", vec![], 10).await?;
        let resp: AccountResponse = serde_json::from_str(&body)?;
        Ok(AccountInfo {
            balances: resp
                .balances
                .into_iter()
                .map(|b| Balance {
                    asset: b.asset,
                    free: b.free.parse().unwrap_or(0.0),
                    locked: b.locked.parse().unwrap_or(0.0),
                })
                .collect(),
            can_trade: resp.can_trade,
        })
    }

    async fn start_user_stream(&self) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/api/v3/userDataStream", self.base_url))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Error::Http)?;
        let text = resp.text().await.map_err(Error::Http)?;
        let parsed: ListenKeyResponse = serde_json::from_str(&text)?;
        Ok(parsed.listen_key)
    }

    async fn keepalive_user_stream(&self, listen_key: &str) -> Result<()> {
        self.http
            .put(format!("{}/api/v3/userDataStream", self.base_url))
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&[("listenKey", listen_key)])
            .send()
            .await
            .map_err(Error::Http)?;
        Ok(())
    }

    async fn close_user_stream(&self, listen_key: &str) -> Result<()> {
        self.http
            .delete(format!("{}/api/v3/userDataStream", self.base_url))
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&[("listenKey", listen_key)])
            .send()
            .await
            .map_err(Error::Http)?;
        Ok(())
    }
}

// ─── Response DTOs ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ServerTimeResponse {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24hResponse {
    last_price: String,
    quote_volume: String,
    price_change_percent: String,
}

#[derive(Deserialize)]
struct PriceTickerResponse {
    price: String,
}

#[derive(Deserialize)]
struct RawKline(
    i64,    // open time
    String, // open
    String, // high
    String, // low
    String, // close
    String, // volume
    i64,    // close time
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
);

impl RawKline {
    fn into_kline(self) -> Kline {
        Kline {
            open_time: Utc.timestamp_millis_opt(self.0).single().unwrap_or_else(Utc::now),
            open: self.1.parse().unwrap_or(0.0),
            high: self.2.parse().unwrap_or(0.0),
            low: self.3.parse().unwrap_or(0.0),
            close: self.4.parse().unwrap_or(0.0),
            volume: self.5.parse().unwrap_or(0.0),
            close_time: Utc.timestamp_millis_opt(self.6).single().unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Deserialize)]
struct DepthResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    status: String,
    filters: Vec<serde_json::Value>,
}

/// Request weight for `/api/v3/klines`, which scales with page size
/// (spec.md §4.1: "klines=1/2/5 by page size") rather than being fixed.
fn klines_weight(limit: u16) -> u32 {
    match limit {
        0..=100 => 1,
        101..=500 => 2,
        _ => 5,
    }
}

fn symbol_to_pair(s: SymbolInfo) -> Option<Pair> {
    if s.status != "TRADING" {
        return None;
    }
    let find = |filter_type: &str, field: &str| -> Option<String> {
        s.filters
            .iter()
            .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
            .and_then(|f| f.get(field))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };

    let tick_size = find("PRICE_FILTER", "tickSize").unwrap_or_else(|| "0.00000001".to_string());
    let min_price = find("PRICE_FILTER", "minPrice")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    let max_price = find("PRICE_FILTER", "maxPrice")
        .and_then(|v| v.parse().ok())
        .unwrap_or(f64::MAX);
    let step_size = find("LOT_SIZE", "stepSize").unwrap_or_else(|| "0.00000001".to_string());
    let min_qty = find("LOT_SIZE", "minQty").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let max_qty = find("LOT_SIZE", "maxQty")
        .and_then(|v| v.parse().ok())
        .unwrap_or(f64::MAX);
    let min_notional = find("MIN_NOTIONAL", "minNotional")
        .or_else(|| find("NOTIONAL", "minNotional"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);

    Some(Pair {
        symbol: s.symbol,
        base_asset: s.base_asset,
        quote_asset: s.quote_asset,
        tick_size,
        step_size,
        min_qty,
        max_qty,
        min_price,
        max_price,
        min_notional,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    client_order_id: String,
    #[serde(default)]
    order_id: Option<i64>,
    status: String,
    #[serde(default)]
    fills: Vec<FillDetail>,
}

impl OrderResponse {
    fn into_ack(self) -> OrderAck {
        OrderAck {
            client_order_id: self.client_order_id,
            venue_order_id: self.order_id.map(|id| id.to_string()),
            status: venue_status_to_order_status(&self.status),
            fills: self.fills.into_iter().map(FillDetail::into_fill).collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillDetail {
    price: String,
    qty: String,
    commission: String,
    commission_asset: String,
    #[serde(default)]
    trade_id: Option<i64>,
}

impl FillDetail {
    fn into_fill(self) -> FillEvent {
        FillEvent {
            quantity: self.qty.parse().unwrap_or(0.0),
            price: self.price.parse().unwrap_or(0.0),
            commission: self.commission.parse().unwrap_or(0.0),
            commission_asset: self.commission_asset,
            trade_id: self.trade_id.map(|t| t.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeResponse {
    id: i64,
    price: String,
    qty: String,
    commission: String,
    commission_asset: String,
}

impl TradeResponse {
    fn into_fill(self) -> FillEvent {
        FillEvent {
            quantity: self.qty.parse().unwrap_or(0.0),
            price: self.price.parse().unwrap_or(0.0),
            commission: self.commission.parse().unwrap_or(0.0),
            commission_asset: self.commission_asset,
            trade_id: self.id.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    can_trade: bool,
    balances: Vec<RawBalance>,
}

#[derive(Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

fn venue_status_to_order_status(status: &str) -> OrderStatus {
    match status {
        "NEW" => OrderStatus::Open,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "EXPIRED" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::Pending,
    }
}
