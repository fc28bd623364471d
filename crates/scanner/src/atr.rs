use common::{Error, Kline, Result};

/// Number of true ranges ATR14 averages (spec.md §4.3).
const ATR_PERIOD: usize = 14;

/// Number of trailing bars ATR14 is computed over: `ATR_PERIOD` true ranges
/// need `ATR_PERIOD + 1` closes to diff against (spec.md §4.3: "on the last
/// 15 1-min/15-min bars").
const ATR_WINDOW_BARS: usize = ATR_PERIOD + 1;

/// Average True Range, fixed at the spec's 14-period/15-bar window — a
/// simple mean of true ranges, not Wilder's RMA smoothing. Only the last
/// `ATR_WINDOW_BARS` bars of whatever history is passed in are considered;
/// older bars are ignored rather than smoothed over.
#[derive(Debug, Clone, Default)]
pub struct AtrIndicator;

impl AtrIndicator {
    pub fn new() -> Self {
        Self
    }

    /// Compute ATR(14) from a slice of klines (oldest first). Errors if
    /// fewer than `ATR_WINDOW_BARS` bars are available (spec.md §4.3:
    /// "Error if fewer than 15 bars").
    pub fn compute(&self, klines: &[Kline]) -> Result<f64> {
        if klines.len() < ATR_WINDOW_BARS {
            return Err(Error::StateInvariant(format!(
                "ATR needs at least {ATR_WINDOW_BARS} bars, got {}",
                klines.len()
            )));
        }

        let window = &klines[klines.len() - ATR_WINDOW_BARS..];
        let true_ranges: Vec<f64> = window
            .windows(2)
            .map(|w| {
                let (prev, curr) = (w[0], w[1]);
                let hl = curr.high - curr.low;
                let hc = (curr.high - prev.close).abs();
                let lc = (curr.low - prev.close).abs();
                hl.max(hc).max(lc)
            })
            .collect();

        debug_assert_eq!(true_ranges.len(), ATR_PERIOD);
        Ok(true_ranges.iter().sum::<f64>() / ATR_PERIOD as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn kline(high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            close_time: Utc::now(),
        }
    }

    #[test]
    fn errors_when_insufficient_data() {
        let atr = AtrIndicator::new();
        let klines = vec![kline(101.0, 99.0, 100.0); 10];
        assert!(atr.compute(&klines).is_err());
    }

    #[test]
    fn flat_range_gives_constant_atr() {
        let atr = AtrIndicator::new();
        let klines = vec![kline(101.0, 99.0, 100.0); 15];
        let value = atr.compute(&klines).unwrap();
        assert!((value - 2.0).abs() < 1e-9, "expected ~2.0, got {value}");
    }

    #[test]
    fn only_the_trailing_window_is_considered() {
        let atr = AtrIndicator::new();
        // 100 bars of a huge range followed by exactly 15 bars of a narrow
        // one — the wide history must not leak into the simple mean.
        let mut klines = vec![kline(200.0, 0.0, 100.0); 100];
        klines.extend(vec![kline(101.0, 99.0, 100.0); 15]);
        let value = atr.compute(&klines).unwrap();
        assert!((value - 2.0).abs() < 1e-9, "expected ~2.0, got {value}");
    }

    #[test]
    fn wider_bars_increase_atr() {
        let atr = AtrIndicator::new();
        let mut klines = vec![kline(101.0, 99.0, 100.0); 5];
        klines.extend(vec![kline(110.0, 90.0, 100.0); 10]);
        let value = atr.compute(&klines).unwrap();
        assert!(value > 2.0, "expected ATR to rise with wider bars, got {value}");
    }
}
