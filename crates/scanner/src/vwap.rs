use chrono::{DateTime, Datelike, Utc};
use common::Kline;

/// Volume-weighted average price accumulated since the start of the current
/// UTC trading session (calendar day). Resets automatically when a bar
/// crosses a day boundary relative to the last bar it saw.
#[derive(Debug, Clone, Default)]
pub struct SessionVwap {
    session_day: Option<(i32, u32, u32)>,
    cumulative_pv: f64,
    cumulative_volume: f64,
}

impl SessionVwap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one closed bar, resetting the accumulator if `bar` starts a
    /// new UTC day.
    pub fn update(&mut self, bar: &Kline) {
        let day = day_key(bar.close_time);
        if self.session_day != Some(day) {
            self.session_day = Some(day);
            self.cumulative_pv = 0.0;
            self.cumulative_volume = 0.0;
        }

        let typical_price = (bar.high + bar.low + bar.close) / 3.0;
        self.cumulative_pv += typical_price * bar.volume;
        self.cumulative_volume += bar.volume;
    }

    /// Current session VWAP, or `None` before any bar has been folded in.
    pub fn value(&self) -> Option<f64> {
        if self.cumulative_volume <= 0.0 {
            return None;
        }
        Some(self.cumulative_pv / self.cumulative_volume)
    }

    /// Compute VWAP over a slice of bars belonging to the same session,
    /// without maintaining accumulator state across calls.
    pub fn compute(bars: &[Kline]) -> Option<f64> {
        let mut acc = Self::new();
        for bar in bars {
            acc.update(bar);
        }
        acc.value()
    }
}

fn day_key(ts: DateTime<Utc>) -> (i32, u32, u32) {
    (ts.year(), ts.month(), ts.day())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline_at(day: u32, high: f64, low: f64, close: f64, volume: f64) -> Kline {
        Kline {
            open_time: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume,
            close_time: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
        }
    }

    use chrono::TimeZone;

    #[test]
    fn single_bar_vwap_is_typical_price() {
        let bars = vec![kline_at(1, 110.0, 90.0, 100.0, 10.0)];
        let vwap = SessionVwap::compute(&bars).unwrap();
        assert!((vwap - 100.0).abs() < 1e-9);
    }

    #[test]
    fn resets_across_day_boundary() {
        let mut acc = SessionVwap::new();
        acc.update(&kline_at(1, 200.0, 200.0, 200.0, 100.0));
        acc.update(&kline_at(2, 10.0, 10.0, 10.0, 1.0));
        // After the reset, only the day-2 bar should count.
        assert!((acc.value().unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_input_returns_none() {
        assert!(SessionVwap::compute(&[]).is_none());
    }
}
