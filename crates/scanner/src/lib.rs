pub mod atr;
pub mod gates;
pub mod vwap;

use chrono::Utc;
use common::{BotConfig, Kline, MarketSnapshot, Ticker24h};

pub use atr::AtrIndicator;
pub use vwap::SessionVwap;

/// Folds one pair's latest market read (klines, 24h ticker, top-of-book)
/// into a `MarketSnapshot`, computing ATR14, session VWAP, and the pair
/// quality gates in one pass.
pub struct Scanner {
    atr: AtrIndicator,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self {
            atr: AtrIndicator::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build_snapshot(
        &self,
        pair: &str,
        klines: &[Kline],
        ticker: Ticker24h,
        best_bid: f64,
        best_bid_qty: f64,
        best_ask: f64,
        best_ask_qty: f64,
        config: &BotConfig,
    ) -> MarketSnapshot {
        let session_vwap = SessionVwap::compute(klines).unwrap_or(ticker.last_price);

        let mid = (best_bid + best_ask) / 2.0;
        let spread_bps = if mid > 0.0 {
            (best_ask - best_bid) / mid * 10_000.0
        } else {
            f64::MAX
        };

        let (mut gate_pass, mut gate_fail_reasons) = gates::evaluate_gates(
            ticker.quote_volume,
            spread_bps,
            best_bid_qty,
            best_bid,
            best_ask_qty,
            best_ask,
            config,
        );

        // ATR is a hard precondition for every playbook's stop math; a pair
        // without enough history to compute it cannot pass regardless of
        // its liquidity gates (spec.md §4.3: "Error if fewer than 15 bars").
        let atr14 = match self.atr.compute(klines) {
            Ok(value) => value,
            Err(e) => {
                gate_pass = false;
                gate_fail_reasons.push(e.to_string());
                0.0
            }
        };

        MarketSnapshot {
            pair: pair.to_string(),
            last_price: ticker.last_price,
            quote_volume_24h: ticker.quote_volume,
            best_bid,
            best_bid_qty,
            best_ask,
            best_ask_qty,
            spread_bps,
            atr14,
            session_vwap,
            gate_pass,
            gate_fail_reasons,
            taken_at: Utc::now(),
        }
    }
}
