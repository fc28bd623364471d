pub mod breakout_trend;
pub mod dip_pullback;
pub mod event_burst;
pub mod vwap_mean_revert;

pub use breakout_trend::BreakoutTrend;
pub use dip_pullback::DipPullback;
pub use event_burst::EventBurst;
pub use vwap_mean_revert::VwapMeanRevert;

/// Average volume of the last `n` klines (or all of them if fewer are
/// available). Shared by playbooks that gate on a volume multiple.
pub(crate) fn average_volume(klines: &[common::Kline], n: usize) -> f64 {
    if klines.is_empty() {
        return 0.0;
    }
    let take = n.min(klines.len());
    let window = &klines[klines.len() - take..];
    window.iter().map(|k| k.volume).sum::<f64>() / window.len() as f64
}

/// Highest high / lowest low over `klines` (all of it — callers pass the
/// slice they want scanned).
pub(crate) fn highest_high(klines: &[common::Kline]) -> Option<f64> {
    klines.iter().map(|k| k.high).fold(None, |acc, h| {
        Some(acc.map_or(h, |a: f64| a.max(h)))
    })
}
