use common::{Kline, MarketSnapshot, OrderSide, Playbook, Signal};

use crate::config::PlaybookParams;
use crate::timeframe::{self, BARS_PER_5M};
use crate::Strategy;

/// Five-minute bars the excursion window spans (spec.md §4.4).
const EVENT_WINDOW_BARS: usize = 10;
/// Minimum |excursion| from the window-start open to count as a burst.
const EXCURSION_THRESHOLD_PCT: f64 = 0.04;
/// Retracement-from-extreme band the current price must sit inside.
const RETRACE_MIN_PCT: f64 = 0.005;
const RETRACE_MAX_PCT: f64 = 0.02;

/// Playbook C — Event Burst.
///
/// Resamples the pair's 1-minute history into the last 10 five-minute
/// bars and finds the single largest percentage excursion (up or down)
/// from the window's opening price. A burst triggers only once price has
/// pulled back 0.5–2.0% off that extreme and the most recent closed bar
/// resumes in the excursion's original direction — the burst-then-retest
/// pattern, not the raw spike. Signals are flagged `is_event` so the
/// router may relax slippage limits or switch to MARKET.
pub struct EventBurst {
    params: PlaybookParams,
}

impl EventBurst {
    pub fn new(params: PlaybookParams) -> Self {
        Self { params }
    }
}

impl Strategy for EventBurst {
    fn playbook(&self) -> Playbook {
        Playbook::C
    }

    fn evaluate(&self, pair: &str, snapshot: &MarketSnapshot, klines: &[Kline]) -> Option<Signal> {
        if snapshot.atr14 <= 0.0 {
            return None;
        }

        let five_min = timeframe::aggregate(klines, BARS_PER_5M);
        if five_min.len() < EVENT_WINDOW_BARS {
            return None;
        }
        let window = &five_min[five_min.len() - EVENT_WINDOW_BARS..];
        let window_open = window.first()?.open;
        if window_open <= 0.0 {
            return None;
        }

        // Largest signed excursion from window_open: positive for the
        // highest high seen, negative for the lowest low, whichever has
        // the larger magnitude.
        let mut excursion = 0.0_f64;
        let mut extreme_price = window_open;
        for bar in window {
            let up = (bar.high - window_open) / window_open;
            let down = (bar.low - window_open) / window_open;
            if up.abs() > excursion.abs() {
                excursion = up;
                extreme_price = bar.high;
            }
            if down.abs() > excursion.abs() {
                excursion = down;
                extreme_price = bar.low;
            }
        }

        if excursion.abs() < EXCURSION_THRESHOLD_PCT {
            return None;
        }

        let current_price = snapshot.last_price;
        let retracement_pct = (extreme_price - current_price).abs() / extreme_price.abs().max(f64::EPSILON);
        if !(RETRACE_MIN_PCT..=RETRACE_MAX_PCT).contains(&retracement_pct) {
            return None;
        }

        let up_move = excursion > 0.0;
        let pulled_back = if up_move { current_price < extreme_price } else { current_price > extreme_price };
        if !pulled_back {
            return None;
        }

        let latest = five_min.last()?;
        let resumes = if up_move { latest.close > latest.open } else { latest.close < latest.open };
        if !resumes {
            return None;
        }

        let side = if up_move { OrderSide::Buy } else { OrderSide::Sell };
        let entry_price = current_price;
        let stop_price = match side {
            OrderSide::Buy => entry_price - self.params.event_stop_atr_mult * snapshot.atr14,
            OrderSide::Sell => entry_price + self.params.event_stop_atr_mult * snapshot.atr14,
        };
        let stop_ok = match side {
            OrderSide::Buy => stop_price < entry_price,
            OrderSide::Sell => stop_price > entry_price,
        };
        if !stop_ok {
            return None;
        }

        let risk = (entry_price - stop_price).abs();
        let target_price = match side {
            OrderSide::Buy => entry_price + self.params.target_r_multiple * risk,
            OrderSide::Sell => entry_price - self.params.target_r_multiple * risk,
        };

        let direction = if up_move { "up" } else { "down" };
        Some(Signal {
            pair: pair.to_string(),
            playbook: Playbook::C,
            side,
            entry_price,
            stop_price,
            target_price: Some(target_price),
            is_event: true,
            session_vwap: snapshot.session_vwap,
            reason: format!(
                "{:.2}% {direction} excursion from window open {window_open:.8}, retraced {:.2}% and resumed {direction}",
                excursion * 100.0,
                retracement_pct * 100.0
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

    fn snapshot(last_price: f64) -> MarketSnapshot {
        MarketSnapshot {
            pair: "SOLUSDT".to_string(),
            last_price,
            quote_volume_24h: 3_000_000.0,
            best_bid: last_price - 0.01,
            best_bid_qty: 10.0,
            best_ask: last_price + 0.01,
            best_ask_qty: 10.0,
            spread_bps: 2.0,
            atr14: 1.0,
            session_vwap: last_price,
            gate_pass: true,
            gate_fail_reasons: vec![],
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn emits_buy_on_burst_retrace_and_resume() {
        let playbook = EventBurst::new(PlaybookParams::default());
        // Window open 100, spike to 105 (+5% excursion), retrace to 104 (~0.95% off
        // the extreme), final minute closes above its open to resume upward.
        let mut klines = vec![minute_kline(100.0, 100.0, 100.0, 100.0); 45];
        klines.push(minute_kline(100.0, 105.0, 100.0, 105.0));
        klines.extend(vec![minute_kline(104.0, 104.0, 104.0, 104.0); 3]);
        klines.push(minute_kline(103.8, 104.2, 103.8, 104.0)); // bullish resumption bar
        let snap = snapshot(104.0);
        let signal = playbook.evaluate("SOLUSDT", &snap, &klines).unwrap();
        assert_eq!(signal.side, OrderSide::Buy);
        assert!(signal.is_event);
        assert!(signal.is_valid());
    }

    #[test]
    fn emits_sell_on_burst_retrace_and_resume_down() {
        let playbook = EventBurst::new(PlaybookParams::default());
        // Window open 100, dives to 95 (-5% excursion), retraces up to 96,
        // final minute closes below its open to resume downward.
        let mut klines = vec![minute_kline(100.0, 100.0, 100.0, 100.0); 45];
        klines.push(minute_kline(100.0, 100.0, 95.0, 95.0));
        klines.extend(vec![minute_kline(96.0, 96.0, 96.0, 96.0); 3]);
        klines.push(minute_kline(96.2, 96.2, 95.8, 96.0)); // bearish resumption bar
        let snap = snapshot(96.0);
        let signal = playbook.evaluate("SOLUSDT", &snap, &klines).unwrap();
        assert_eq!(signal.side, OrderSide::Sell);
        assert!(signal.is_event);
        assert!(signal.is_valid());
    }

    #[test]
    fn ignores_excursion_below_threshold() {
        let playbook = EventBurst::new(PlaybookParams::default());
        // Only a 1% excursion, well under the 4% threshold.
        let mut klines = vec![minute_kline(100.0, 100.0, 100.0, 100.0); 45];
        klines.push(minute_kline(100.0, 101.0, 100.0, 101.0));
        klines.extend(vec![minute_kline(100.5, 100.5, 100.5, 100.5); 4]);
        let snap = snapshot(100.5);
        assert!(playbook.evaluate("SOLUSDT", &snap, &klines).is_none());
    }

    #[test]
    fn ignores_excursion_without_retrace() {
        let playbook = EventBurst::new(PlaybookParams::default());
        // 5% excursion but price is still sitting right at the extreme, no retrace.
        let mut klines = vec![minute_kline(100.0, 100.0, 100.0, 100.0); 45];
        klines.push(minute_kline(100.0, 105.0, 100.0, 105.0));
        klines.extend(vec![minute_kline(105.0, 105.0, 105.0, 105.0); 4]);
        let snap = snapshot(105.0);
        assert!(playbook.evaluate("SOLUSDT", &snap, &klines).is_none());
    }
}
