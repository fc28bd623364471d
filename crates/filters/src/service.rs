use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use common::{Error, ExchangeClient, Pair, Result};

use crate::precision;

/// A price/quantity pair shaped to a venue's grid and confirmed to clear
/// every bound filter — the only form an `Order` should be submitted with.
#[derive(Debug, Clone, Copy)]
pub struct ShapedOrder {
    pub price: f64,
    pub quantity: f64,
}

/// Holds the venue's per-pair trading filters (tick/step/min-max/notional),
/// refreshed once a day. Every price and quantity that crosses into
/// `execution` passes through `shape_and_validate` first.
pub struct FilterService {
    pairs: RwLock<HashMap<String, Pair>>,
    refresh_interval: Duration,
}

impl Default for FilterService {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterService {
    pub fn new() -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            refresh_interval: Duration::from_secs(86_400),
        }
    }

    pub async fn refresh(&self, client: &dyn ExchangeClient) -> Result<()> {
        let pairs = client.exchange_info().await?;
        let mut guard = self.pairs.write().await;
        guard.clear();
        for pair in pairs {
            guard.insert(pair.symbol.clone(), pair);
        }
        info!(count = guard.len(), "refreshed exchange filters");
        Ok(())
    }

    pub async fn get(&self, symbol: &str) -> Option<Pair> {
        self.pairs.read().await.get(symbol).cloned()
    }

    pub async fn known_symbols(&self) -> Vec<String> {
        self.pairs.read().await.keys().cloned().collect()
    }

    /// Snapshot every cached pair, for callers that need to persist the
    /// whole exchange-info cache rather than look up one symbol.
    pub async fn list(&self) -> Vec<Pair> {
        self.pairs.read().await.values().cloned().collect()
    }

    /// Refresh once immediately, then once per `refresh_interval` forever.
    /// Call inside `tokio::spawn`.
    pub async fn run_daily_refresh(self: Arc<Self>, client: Arc<dyn ExchangeClient>) {
        loop {
            if let Err(e) = self.refresh(client.as_ref()).await {
                warn!(error = %e, "exchange filter refresh failed, keeping stale filters");
            }
            tokio::time::sleep(self.refresh_interval).await;
        }
    }

    /// Round `price`/`quantity` onto the pair's tick/step grid and confirm
    /// the shaped order clears LOT_SIZE, price bounds, and MIN_NOTIONAL.
    /// Every failing check is collected rather than short-circuited on the
    /// first (spec.md §4.2: "Report all failures collected, not only the
    /// first"), joined into one `Error::FilterError`.
    pub async fn shape_and_validate(&self, symbol: &str, price: f64, quantity: f64) -> Result<ShapedOrder> {
        let pair = self
            .get(symbol)
            .await
            .ok_or_else(|| Error::FilterError(format!("no cached filters for pair '{symbol}'")))?;

        let tick: f64 = pair.tick_size.parse().unwrap_or(0.0);
        let step: f64 = pair.step_size.parse().unwrap_or(0.0);

        let shaped_price = precision::floor_to_tick(price, tick);
        let shaped_qty = precision::floor_to_step(quantity, step);

        let mut failures = Vec::new();

        if shaped_qty < pair.min_qty {
            failures.push(format!(
                "LOT_SIZE: shaped quantity {shaped_qty} below minQty {}",
                pair.min_qty
            ));
        }
        if shaped_qty > pair.max_qty {
            failures.push(format!(
                "LOT_SIZE: shaped quantity {shaped_qty} above maxQty {}",
                pair.max_qty
            ));
        }
        if !precision::is_multiple_of(shaped_qty, step) {
            failures.push(format!("LOT_SIZE: {shaped_qty} is not a multiple of stepSize {step}"));
        }
        if shaped_price < pair.min_price || shaped_price > pair.max_price {
            failures.push(format!(
                "PRICE_FILTER: shaped price {shaped_price} outside [{}, {}]",
                pair.min_price, pair.max_price
            ));
        }

        let notional = shaped_price * shaped_qty;
        if notional < pair.min_notional {
            failures.push(format!("MIN_NOTIONAL: {notional} below minimum {}", pair.min_notional));
        }

        if !failures.is_empty() {
            return Err(Error::FilterError(format!("{symbol}: {}", failures.join("; "))));
        }

        Ok(ShapedOrder {
            price: shaped_price,
            quantity: shaped_qty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pair() -> Pair {
        Pair {
            symbol: "BTCUSDT".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            tick_size: "0.01".to_string(),
            step_size: "0.0001".to_string(),
            min_qty: 0.0001,
            max_qty: 100.0,
            min_price: 1.0,
            max_price: 1_000_000.0,
            min_notional: 10.0,
        }
    }

    #[tokio::test]
    async fn shapes_price_and_quantity_onto_grid() {
        let service = FilterService::new();
        service.pairs.write().await.insert("BTCUSDT".to_string(), test_pair());

        let shaped = service.shape_and_validate("BTCUSDT", 50123.456, 0.00019).await.unwrap();
        assert!((shaped.price - 50123.45).abs() < 1e-9);
        assert!((shaped.quantity - 0.0001).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejects_below_min_notional() {
        let service = FilterService::new();
        service.pairs.write().await.insert("BTCUSDT".to_string(), test_pair());

        let err = service.shape_and_validate("BTCUSDT", 1.0, 0.0001).await.unwrap_err();
        assert!(matches!(err, Error::FilterError(_)));
    }

    #[tokio::test]
    async fn rejects_unknown_pair() {
        let service = FilterService::new();
        let err = service.shape_and_validate("DOGEUSDT", 1.0, 1.0).await.unwrap_err();
        assert!(matches!(err, Error::FilterError(_)));
    }
}
