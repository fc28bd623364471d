use common::{Kline, MarketSnapshot, OrderSide, Playbook, Signal};

use crate::config::PlaybookParams;
use crate::playbooks::average_volume;
use crate::timeframe::{self, BARS_PER_15M};
use crate::Strategy;

/// 15m bars the return mean/stdev are computed over (spec.md §4.4: "~50 bars").
const RETURN_WINDOW_BARS: usize = 50;

/// 15m bars the volume average is taken over (spec.md §4.4: "20-bar average").
const VOLUME_WINDOW_BARS: usize = 20;

/// 1-minute bars the swing low is searched over for the stop (spec.md §4.4:
/// "last 10-bar swing low").
const SWING_LOOKBACK_BARS: usize = 10;

/// Playbook D — Dip Pullback.
///
/// Resamples the pair's 1-minute history into 15-minute bars and computes
/// the mean and standard deviation of the trailing `RETURN_WINDOW_BARS`
/// bar-over-bar returns. Triggers when the latest return sits
/// `dip_zscore_threshold` standard deviations below that mean and the
/// latest bar's volume confirms on at least `dip_volume_mult` times the
/// trailing 20-bar average. Stop sits `dip_stop_atr_mult` ATRs below the
/// most recent 10-bar swing low.
pub struct DipPullback {
    params: PlaybookParams,
}

impl DipPullback {
    pub fn new(params: PlaybookParams) -> Self {
        Self { params }
    }
}

impl Strategy for DipPullback {
    fn playbook(&self) -> Playbook {
        Playbook::D
    }

    fn evaluate(&self, pair: &str, snapshot: &MarketSnapshot, klines: &[Kline]) -> Option<Signal> {
        if snapshot.atr14 <= 0.0 {
            return None;
        }

        let fifteen_min = timeframe::aggregate(klines, BARS_PER_15M);
        if fifteen_min.len() < RETURN_WINDOW_BARS + 1 || fifteen_min.len() < VOLUME_WINDOW_BARS + 1 {
            return None;
        }

        let return_window = &fifteen_min[fifteen_min.len() - (RETURN_WINDOW_BARS + 1)..];
        let returns: Vec<f64> = return_window
            .windows(2)
            .map(|w| (w[1].close - w[0].close) / w[0].close)
            .collect();
        debug_assert_eq!(returns.len(), RETURN_WINDOW_BARS);

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let stdev = variance.sqrt();
        let latest_return = *returns.last()?;

        if stdev <= 0.0 {
            return None;
        }
        let z_score = (mean - latest_return) / stdev;
        if z_score < self.params.dip_zscore_threshold {
            return None;
        }

        let volume_window = &fifteen_min[fifteen_min.len() - 1 - VOLUME_WINDOW_BARS..fifteen_min.len() - 1];
        let avg_volume = average_volume(volume_window, volume_window.len());
        let latest_volume = fifteen_min.last()?.volume;
        if avg_volume <= 0.0 || latest_volume < self.params.dip_volume_mult * avg_volume {
            return None;
        }

        if klines.len() < SWING_LOOKBACK_BARS {
            return None;
        }
        let swing_window = &klines[klines.len() - SWING_LOOKBACK_BARS..];
        let swing_low = swing_window.iter().map(|k| k.low).fold(f64::MAX, f64::min);

        let entry_price = snapshot.last_price;
        let stop_price = swing_low - self.params.dip_stop_atr_mult * snapshot.atr14;
        if stop_price >= entry_price {
            return None;
        }
        let risk = entry_price - stop_price;
        let target_price = entry_price + self.params.target_r_multiple * risk;

        Some(Signal {
            pair: pair.to_string(),
            playbook: Playbook::D,
            side: OrderSide::Buy,
            entry_price,
            stop_price,
            target_price: Some(target_price),
            is_event: false,
            session_vwap: snapshot.session_vwap,
            reason: format!(
                "15m return {latest_return:.6} is {z_score:.2} stdevs below the 50-bar mean {mean:.6} on {:.2}x the 20-bar volume average",
                latest_volume / avg_volume
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn kline(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Kline {
        Kline {
            open_time: Utc::now(),
            open,
            high,
            low,
            close,
            volume,
            close_time: Utc::now(),
        }
    }

    fn snapshot(last_price: f64, atr14: f64) -> MarketSnapshot {
        MarketSnapshot {
            pair: "ADAUSDT".to_string(),
            last_price,
            quote_volume_24h: 2_000_000.0,
            best_bid: last_price - 0.001,
            best_bid_qty: 10.0,
            best_ask: last_price + 0.001,
            best_ask_qty: 10.0,
            spread_bps: 2.0,
            atr14,
            session_vwap: last_price,
            gate_pass: true,
            gate_fail_reasons: vec![],
            taken_at: Utc::now(),
        }
    }

    /// `RETURN_WINDOW_BARS + 1` quiet 15m bars at a flat close of 100.0
    /// (each 1-minute bar volume 10.0), followed by one final 15m bar that
    /// closes at `dip_close` and carries `dip_volume` total volume.
    fn quiet_history_with_dip(dip_close: f64, dip_volume: f64) -> Vec<Kline> {
        let quiet_bars = RETURN_WINDOW_BARS * BARS_PER_15M;
        let mut klines = vec![kline(100.0, 100.5, 99.5, 100.0, 10.0); quiet_bars];
        let per_minute_volume = dip_volume / BARS_PER_15M as f64;
        klines.extend(vec![
            kline(100.0, 100.2, dip_close - 0.5, dip_close, per_minute_volume);
            BARS_PER_15M
        ]);
        klines
    }

    #[test]
    fn emits_buy_on_statistically_significant_dip_with_volume() {
        let playbook = DipPullback::new(PlaybookParams::default());
        let klines = quiet_history_with_dip(90.0, 500.0);
        let snap = snapshot(90.0, 2.0);
        let signal = playbook.evaluate("ADAUSDT", &snap, &klines).unwrap();
        assert_eq!(signal.side, OrderSide::Buy);
        assert!(signal.is_valid());
        // Stop = 10-bar swing low (dip bar low, 89.5) - 1 ATR (2.0) = 87.5.
        assert!((signal.stop_price - 87.5).abs() < 1e-6);
    }

    #[test]
    fn no_signal_without_volume_confirmation() {
        let playbook = DipPullback::new(PlaybookParams::default());
        let klines = quiet_history_with_dip(90.0, 10.0); // no volume confirmation
        let snap = snapshot(90.0, 2.0);
        assert!(playbook.evaluate("ADAUSDT", &snap, &klines).is_none());
    }

    #[test]
    fn no_signal_without_enough_history() {
        let playbook = DipPullback::new(PlaybookParams::default());
        let klines = vec![kline(100.0, 100.5, 99.5, 100.0, 10.0); 100];
        let snap = snapshot(100.0, 2.0);
        assert!(playbook.evaluate("ADAUSDT", &snap, &klines).is_none());
    }

    #[test]
    fn no_signal_on_flat_returns() {
        // Zero stdev (every 15m bar closes identically) must not divide by
        // zero or trigger — there is no dip to measure against.
        let playbook = DipPullback::new(PlaybookParams::default());
        let klines = vec![kline(100.0, 100.5, 99.5, 100.0, 10.0); (RETURN_WINDOW_BARS + 1) * BARS_PER_15M];
        let snap = snapshot(100.0, 2.0);
        assert!(playbook.evaluate("ADAUSDT", &snap, &klines).is_none());
    }
}
