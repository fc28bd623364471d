use common::Kline;

/// Underlying bar size fed into `StrategyRegistry` (spec.md §4.7: WS klines
/// are 1-minute candles). Playbooks that need coarser bars resample from
/// this via [`aggregate`] rather than tracking their own history.
pub const BARS_PER_5M: usize = 5;
pub const BARS_PER_15M: usize = 15;
pub const BARS_PER_HOUR: usize = 60;
pub const HOURS_PER_DAY: usize = 24;

/// Resample `klines` (oldest first, 1-minute bars) into synthetic
/// `bars_per_bucket`-minute OHLCV bars. Buckets are trailing-aligned: a
/// leading partial bucket is dropped so every returned bar covers a full
/// `bars_per_bucket` minutes, and the last returned bar always ends on the
/// most recent input bar.
pub fn aggregate(klines: &[Kline], bars_per_bucket: usize) -> Vec<Kline> {
    if bars_per_bucket == 0 || klines.len() < bars_per_bucket {
        return Vec::new();
    }
    let usable = (klines.len() / bars_per_bucket) * bars_per_bucket;
    let trimmed = &klines[klines.len() - usable..];

    trimmed
        .chunks(bars_per_bucket)
        .map(|chunk| {
            let first = chunk.first().expect("chunks() never yields empty slices");
            let last = chunk.last().expect("chunks() never yields empty slices");
            Kline {
                open_time: first.open_time,
                open: first.open,
                high: chunk.iter().map(|k| k.high).fold(f64::MIN, f64::max),
                low: chunk.iter().map(|k| k.low).fold(f64::MAX, f64::min),
                close: last.close,
                volume: chunk.iter().map(|k| k.volume).sum(),
                close_time: last.close_time,
            }
        })
        .collect()
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

    #[test]
    fn drops_a_leading_partial_bucket() {
        let mut klines = vec![kline(1.0, 1.0, 1.0, 1.0, 1.0)]; // 1 extra bar, should be dropped
        klines.extend(vec![kline(100.0, 101.0, 99.0, 100.5, 10.0); 15]);
        let bars = aggregate(&klines, 15);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].volume, 150.0);
    }

    #[test]
    fn ohlc_folds_correctly_across_a_bucket() {
        let klines = vec![
            kline(100.0, 102.0, 99.0, 101.0, 5.0),
            kline(101.0, 105.0, 100.0, 103.0, 7.0),
            kline(103.0, 104.0, 98.0, 99.0, 3.0),
        ];
        let bars = aggregate(&klines, 3);
        assert_eq!(bars.len(), 1);
        let bar = bars[0];
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.close, 99.0);
        assert_eq!(bar.high, 105.0);
        assert_eq!(bar.low, 98.0);
        assert_eq!(bar.volume, 15.0);
    }

    #[test]
    fn too_few_bars_yields_nothing() {
        let klines = vec![kline(1.0, 1.0, 1.0, 1.0, 1.0); 4];
        assert!(aggregate(&klines, 5).is_empty());
    }
}
