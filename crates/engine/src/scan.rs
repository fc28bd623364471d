use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

use common::{BotConfig, ExchangeClient, MarketEvent, Signal};
use scanner::Scanner;
use strategy::StrategyRegistry;

/// One scan-tick pass over a single pair (spec.md §4.7 "Scan task"): pull a
/// fresh 24h ticker and top-of-book read, fold it through the scanner into
/// a snapshot against the pair's rolling kline history, and run every
/// enabled playbook against the result. Returns whatever signals the
/// playbooks emit; empty means the pair failed its quality gates or no
/// playbook fired, not an error.
pub async fn scan_pair(
    client: &dyn ExchangeClient,
    scanner: &Scanner,
    strategy: &RwLock<StrategyRegistry>,
    config: &BotConfig,
    pair: &str,
) -> Vec<Signal> {
    let ticker = match client.ticker_24h(pair).await {
        Ok(t) => t,
        Err(e) => {
            warn!(pair, error = %e, "scan tick: failed to fetch 24h ticker");
            return Vec::new();
        }
    };
    let book = match client.depth(pair, 5).await {
        Ok(b) => b,
        Err(e) => {
            warn!(pair, error = %e, "scan tick: failed to fetch order book depth");
            return Vec::new();
        }
    };

    let registry = strategy.read().await;
    let snapshot = scanner.build_snapshot(
        pair,
        registry.history_for(pair),
        ticker,
        book.best_bid,
        book.best_bid_qty,
        book.best_ask,
        book.best_ask_qty,
        config,
    );
    registry.generate(pair, &snapshot)
}

/// Re-publish the venue's latest trade price for every universe pair as a
/// synthetic, not-closed `MarketEvent` (spec.md §4.7 "Position monitor").
/// This keeps `risk::RiskManager`'s stop/target/time-stop checks ticking at
/// a fixed cadence even on a pair that hasn't produced a fresh 1-minute
/// kline over the WebSocket; `StrategyRegistry::ingest_event` ignores these
/// since `is_candle_closed` is false, so they never pollute playbook history.
pub async fn publish_price_heartbeat(
    client: &dyn ExchangeClient,
    market_tx: &broadcast::Sender<MarketEvent>,
    universe: &[String],
) {
    for pair in universe {
        match client.ticker_price(pair).await {
            Ok(price) => {
                let _ = market_tx.send(MarketEvent {
                    pair: pair.clone(),
                    price,
                    open: price,
                    high: price,
                    low: price,
                    volume: 0.0,
                    is_candle_closed: false,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => warn!(pair, error = %e, "position monitor: failed to refresh price"),
        }
    }
}
