use common::{Kline, MarketSnapshot, OrderSide, Playbook, Signal};

use crate::config::PlaybookParams;
use crate::timeframe::{self, BARS_PER_15M};
use crate::Strategy;

/// A wick must be at least this many times the candle body to count as the
/// long wick of a hammer/shooting-star reversal (spec.md §4.4).
const WICK_TO_BODY_RATIO: f64 = 2.0;

/// Playbook B — VWAP Mean Revert.
///
/// Resamples the pair's 1-minute history into the latest closed 15m bar.
/// Deviation = |price − VWAP| / ATR. Below VWAP, a hammer on that bar
/// (long lower wick, small upper wick) triggers a BUY back toward VWAP;
/// above VWAP, a shooting star (long upper wick, small lower wick)
/// triggers a SELL back toward VWAP. Target is VWAP itself; stop sits
/// `vwap_stop_atr_mult` ATRs beyond entry on the side away from VWAP.
pub struct VwapMeanRevert {
    params: PlaybookParams,
}

impl VwapMeanRevert {
    pub fn new(params: PlaybookParams) -> Self {
        Self { params }
    }
}

impl Strategy for VwapMeanRevert {
    fn playbook(&self) -> Playbook {
        Playbook::B
    }

    fn evaluate(&self, pair: &str, snapshot: &MarketSnapshot, klines: &[Kline]) -> Option<Signal> {
        if snapshot.atr14 <= 0.0 {
            return None;
        }

        let fifteen_min = timeframe::aggregate(klines, BARS_PER_15M);
        let latest = fifteen_min.last()?;

        let deviation = (snapshot.last_price - snapshot.session_vwap).abs() / snapshot.atr14;
        if deviation < self.params.vwap_deviation_atr_mult {
            return None;
        }

        let body = (latest.close - latest.open).abs();
        let upper_wick = latest.high - latest.open.max(latest.close);
        let lower_wick = latest.open.min(latest.close) - latest.low;

        let below_vwap = snapshot.last_price < snapshot.session_vwap;
        let (side, pattern_name, pattern_present) = if below_vwap {
            (OrderSide::Buy, "hammer", lower_wick >= WICK_TO_BODY_RATIO * body && upper_wick <= body)
        } else {
            (OrderSide::Sell, "shooting star", upper_wick >= WICK_TO_BODY_RATIO * body && lower_wick <= body)
        };

        if !pattern_present {
            return None;
        }

        let entry_price = snapshot.last_price;
        let target_price = snapshot.session_vwap;
        let stop_price = match side {
            OrderSide::Buy => entry_price - self.params.vwap_stop_atr_mult * snapshot.atr14,
            OrderSide::Sell => entry_price + self.params.vwap_stop_atr_mult * snapshot.atr14,
        };

        let ordered = match side {
            OrderSide::Buy => stop_price < entry_price && entry_price < target_price,
            OrderSide::Sell => stop_price > entry_price && entry_price > target_price,
        };
        if !ordered {
            return None;
        }

        Some(Signal {
            pair: pair.to_string(),
            playbook: Playbook::B,
            side,
            entry_price,
            stop_price,
            target_price: Some(target_price),
            is_event: false,
            session_vwap: snapshot.session_vwap,
            reason: format!(
                "price {entry_price:.8} deviated {deviation:.2} ATRs from VWAP {:.8} on a {pattern_name}",
                snapshot.session_vwap
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn minute_kline(open: f64, high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 10.0,
            close_time: Utc::now(),
        }
    }

    fn snapshot(last_price: f64, vwap: f64, atr14: f64) -> MarketSnapshot {
        MarketSnapshot {
            pair: "ETHUSDT".to_string(),
            last_price,
            quote_volume_24h: 5_000_000.0,
            best_bid: last_price - 0.01,
            best_bid_qty: 10.0,
            best_ask: last_price + 0.01,
            best_ask_qty: 10.0,
            spread_bps: 2.0,
            atr14,
            session_vwap: vwap,
            gate_pass: true,
            gate_fail_reasons: vec![],
            taken_at: Utc::now(),
        }
    }

    /// 15 identical 1-minute bars fold into one 15m bar with this shape.
    fn fifteen_bars_shaped(open: f64, high: f64, low: f64, close: f64) -> Vec<Kline> {
        vec![minute_kline(open, high, low, close); 15]
    }

    #[test]
    fn emits_buy_on_hammer_below_vwap() {
        let playbook = VwapMeanRevert::new(PlaybookParams::default());
        // Long lower wick, tiny upper wick, small body: 96->95.8, low 92.0, high 96.2.
        let klines = fifteen_bars_shaped(96.0, 96.2, 92.0, 95.8);
        let snap = snapshot(95.8, 100.0, 2.0); // deviation 4.2/2.0 = 2.1 >= 1.5
        let signal = playbook.evaluate("ETHUSDT", &snap, &klines).unwrap();
        assert_eq!(signal.side, OrderSide::Buy);
        assert!(signal.is_valid());
        assert_eq!(signal.target_price, Some(100.0));
    }

    #[test]
    fn emits_sell_on_shooting_star_above_vwap() {
        let playbook = VwapMeanRevert::new(PlaybookParams::default());
        // Long upper wick, tiny lower wick, small body: 104->104.2, high 108.0, low 103.8.
        let klines = fifteen_bars_shaped(104.0, 108.0, 103.8, 104.2);
        let snap = snapshot(104.2, 100.0, 2.0); // deviation 4.2/2.0 = 2.1 >= 1.5
        let signal = playbook.evaluate("ETHUSDT", &snap, &klines).unwrap();
        assert_eq!(signal.side, OrderSide::Sell);
        assert!(signal.is_valid());
        assert!(signal.stop_price > signal.entry_price);
        assert_eq!(signal.target_price, Some(100.0));
    }

    #[test]
    fn no_signal_without_reversal_pattern() {
        let playbook = VwapMeanRevert::new(PlaybookParams::default());
        let klines = fifteen_bars_shaped(96.0, 96.5, 94.0, 95.0); // closes below open, no hammer wick
        let snap = snapshot(95.0, 100.0, 2.0);
        assert!(playbook.evaluate("ETHUSDT", &snap, &klines).is_none());
    }

    #[test]
    fn no_signal_without_sufficient_stretch() {
        let playbook = VwapMeanRevert::new(PlaybookParams::default());
        let klines = fifteen_bars_shaped(99.0, 99.5, 98.5, 99.3);
        let snap = snapshot(99.3, 100.0, 2.0); // deviation 0.35 < 1.5
        assert!(playbook.evaluate("ETHUSDT", &snap, &klines).is_none());
    }
}
