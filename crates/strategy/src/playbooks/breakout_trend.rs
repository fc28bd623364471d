use common::{Kline, MarketSnapshot, OrderSide, Playbook, Signal};

use crate::config::PlaybookParams;
use crate::playbooks::{average_volume, highest_high};
use crate::timeframe::{self, BARS_PER_15M, BARS_PER_HOUR, HOURS_PER_DAY};
use crate::Strategy;

/// Trailing hourly bars scanned for the breakout high (spec.md §4.4: "20-hour-bar high").
const HOURLY_BREAKOUT_WINDOW: usize = 20;

/// 15m bars the volume average is taken over (spec.md §4.4: "20-bar average").
const FIFTEEN_MIN_VOLUME_WINDOW: usize = 20;

/// Playbook A — Breakout Trend.
///
/// Resamples the pair's 1-minute history into hourly and 15-minute bars.
/// Enters long when the last price clears `max(20-hour high, prior-day
/// high)` and the latest closed 15m bar's volume confirms on at least
/// `breakout_volume_mult` times the trailing 20-bar 15m average. Stop sits
/// below the breakout level by `breakout_stop_atr_mult` ATRs.
pub struct BreakoutTrend {
    params: PlaybookParams,
}

impl BreakoutTrend {
    pub fn new(params: PlaybookParams) -> Self {
        Self { params }
    }
}

impl Strategy for BreakoutTrend {
    fn playbook(&self) -> Playbook {
        Playbook::A
    }

    fn evaluate(&self, pair: &str, snapshot: &MarketSnapshot, klines: &[Kline]) -> Option<Signal> {
        if snapshot.atr14 <= 0.0 {
            return None;
        }

        let hourly = timeframe::aggregate(klines, BARS_PER_HOUR);
        let fifteen_min = timeframe::aggregate(klines, BARS_PER_15M);
        if hourly.len() < HOURLY_BREAKOUT_WINDOW || fifteen_min.len() < FIFTEEN_MIN_VOLUME_WINDOW + 1 {
            return None;
        }

        let recent_hourly = &hourly[hourly.len() - HOURLY_BREAKOUT_WINDOW..];
        let twenty_hour_high = highest_high(recent_hourly)?;

        // A full prior UTC day of hourly bars sits just behind the 20-hour
        // window only once the registry has accumulated 48h of history.
        let prior_day_high = (hourly.len() >= 2 * HOURS_PER_DAY).then(|| {
            let start = hourly.len() - 2 * HOURS_PER_DAY;
            let end = hourly.len() - HOURS_PER_DAY;
            highest_high(&hourly[start..end])
        }).flatten();

        let (breakout_level, pdh_driven) = match prior_day_high {
            Some(pdh) if pdh > twenty_hour_high => (pdh, true),
            _ => (twenty_hour_high, false),
        };

        let latest_15m = fifteen_min.last()?;
        let volume_window = &fifteen_min[fifteen_min.len() - 1 - FIFTEEN_MIN_VOLUME_WINDOW..fifteen_min.len() - 1];
        let avg_volume = average_volume(volume_window, volume_window.len());

        let breaks_out = snapshot.last_price >= breakout_level;
        let volume_confirmed = avg_volume > 0.0 && latest_15m.volume >= self.params.breakout_volume_mult * avg_volume;

        if !breaks_out || !volume_confirmed {
            return None;
        }

        let entry_price = snapshot.last_price;
        let stop_price = breakout_level - self.params.breakout_stop_atr_mult * snapshot.atr14;
        if stop_price >= entry_price {
            return None;
        }
        let risk = entry_price - stop_price;
        let target_price = entry_price + self.params.target_r_multiple * risk;

        let level_label = if pdh_driven { "PDH" } else { "20-hour high" };
        Some(Signal {
            pair: pair.to_string(),
            playbook: Playbook::A,
            side: OrderSide::Buy,
            entry_price,
            stop_price,
            target_price: Some(target_price),
            is_event: false,
            session_vwap: snapshot.session_vwap,
            reason: format!(
                "price {entry_price:.8} cleared {level_label} {breakout_level:.8} on {:.2}x the 20-bar 15m volume average",
                latest_15m.volume / avg_volume
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn minute_kline(high: f64, low: f64, close: f64, volume: f64) -> Kline {
        Kline {
            open_time: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume,
            close_time: Utc::now(),
        }
    }

    fn snapshot(last_price: f64, atr14: f64) -> MarketSnapshot {
        MarketSnapshot {
            pair: "BTCUSDT".to_string(),
            last_price,
            quote_volume_24h: 10_000_000.0,
            best_bid: last_price - 0.01,
            best_bid_qty: 10.0,
            best_ask: last_price + 0.01,
            best_ask_qty: 10.0,
            spread_bps: 2.0,
            atr14,
            session_vwap: last_price,
            gate_pass: true,
            gate_fail_reasons: vec![],
            taken_at: Utc::now(),
        }
    }

    /// Build 48h of quiet 1-minute bars (high=101, low=99) with a breakout
    /// bar at the very end of the most recent hour, high volume on the
    /// final 15m bucket.
    fn quiet_history_with_breakout(breakout_high: f64, breakout_volume: f64) -> Vec<Kline> {
        let mut klines = vec![minute_kline(101.0, 99.0, 100.0, 10.0); 2_880 - 15];
        // Final 15m bucket: 14 quiet minutes then one breakout minute with
        // volume far above the 20-bar 15m average.
        klines.extend(vec![minute_kline(101.0, 99.0, 100.0, 10.0); 14]);
        klines.push(minute_kline(breakout_high, 100.0, breakout_high, breakout_volume));
        klines
    }

    #[test]
    fn emits_buy_on_twenty_hour_high_breakout() {
        let playbook = BreakoutTrend::new(PlaybookParams::default());
        let klines = quiet_history_with_breakout(106.0, 500.0);
        let snap = snapshot(106.0, 2.0);
        let signal = playbook.evaluate("BTCUSDT", &snap, &klines).unwrap();
        assert_eq!(signal.side, OrderSide::Buy);
        assert!(signal.is_valid());
        assert!(signal.reason.contains("20-hour high"));
    }

    #[test]
    fn reason_names_pdh_when_prior_day_high_wins() {
        let params = PlaybookParams {
            breakout_volume_mult: 1.0,
            ..PlaybookParams::default()
        };
        let playbook = BreakoutTrend::new(params);

        // Prior day (the oldest 1440 minutes of the 48h window) gets one
        // tall spike to 130 — well above anything in the most recent 20
        // hours, which stay capped at 101. The final bar keeps that same
        // modest high but carries the confirming 15m volume.
        let mut klines = vec![minute_kline(101.0, 99.0, 100.0, 10.0); 2_880];
        let spike_idx = 700; // inside minutes 0..1440, the prior-day segment
        klines[spike_idx] = minute_kline(130.0, 99.0, 100.0, 10.0);

        let last = klines.len() - 1;
        klines[last] = minute_kline(101.0, 99.0, 100.0, 200.0);

        // Current price clears the PDH of 130; the most recent 20 hours
        // alone (topping out at 101) would not have triggered a breakout.
        let snap = snapshot(131.0, 2.0);
        let signal = playbook.evaluate("BTCUSDT", &snap, &klines).unwrap();
        assert!(signal.reason.contains("PDH"), "reason was: {}", signal.reason);
        assert!((signal.stop_price - (130.0 - 2.0)).abs() < 1e-9);
    }

    #[test]
    fn no_signal_without_enough_history() {
        let playbook = BreakoutTrend::new(PlaybookParams::default());
        let klines = vec![minute_kline(101.0, 99.0, 100.0, 10.0); 100];
        let snap = snapshot(100.5, 2.0);
        assert!(playbook.evaluate("BTCUSDT", &snap, &klines).is_none());
    }

    #[test]
    fn no_signal_on_low_volume_breakout() {
        let playbook = BreakoutTrend::new(PlaybookParams::default());
        let klines = quiet_history_with_breakout(106.0, 10.0); // no volume confirmation
        let snap = snapshot(106.0, 2.0);
        assert!(playbook.evaluate("BTCUSDT", &snap, &klines).is_none());
    }

    #[test]
    fn no_signal_below_breakout_level() {
        let playbook = BreakoutTrend::new(PlaybookParams::default());
        let klines = vec![minute_kline(101.0, 99.0, 100.0, 10.0); 2_880];
        let snap = snapshot(100.5, 2.0);
        assert!(playbook.evaluate("BTCUSDT", &snap, &klines).is_none());
    }
}
