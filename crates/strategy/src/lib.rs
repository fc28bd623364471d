pub mod config;
pub mod playbooks;
pub mod registry;
pub mod timeframe;

pub use config::PlaybookParams;
pub use registry::StrategyRegistry;

use common::{Kline, MarketSnapshot, Signal};

/// All playbook implementations satisfy this trait. A playbook is stateless
/// with respect to account/position state — it only ever looks at the
/// current market read and recent bar history for one pair.
pub trait Strategy: Send + Sync {
    fn playbook(&self) -> common::Playbook;

    /// Evaluate the latest market snapshot and recent closed bars
    /// (oldest first) for `pair`, optionally emitting a candidate signal.
    /// Callers should only invoke this when `snapshot.gate_pass` — playbooks
    /// don't re-check quality gates themselves.
    fn evaluate(&self, pair: &str, snapshot: &MarketSnapshot, klines: &[Kline]) -> Option<Signal>;
}
