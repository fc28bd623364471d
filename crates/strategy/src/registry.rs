use std::collections::HashMap;

use tracing::info;

use common::{BotConfig, Kline, MarketEvent, MarketSnapshot, Signal};

use crate::config::PlaybookParams;
use crate::playbooks::{BreakoutTrend, DipPullback, EventBurst, VwapMeanRevert};
use crate::Strategy;

/// 48 hours of 1-minute bars — enough for Playbook A to resample 24 hourly
/// bars plus a full prior UTC day for its prior-day-high comparison
/// (spec.md §4.4).
const MAX_HISTORY_BARS: usize = 2_880;

/// Holds the enabled playbooks and each pair's rolling closed-bar history,
/// and dispatches one pair's market snapshot through every enabled
/// playbook. Driven by the engine supervisor's scan-tick task rather than
/// a standalone event loop — there is no per-pair cooldown or cadence
/// logic in here, that lives in `risk` against shared `BotState`.
pub struct StrategyRegistry {
    playbooks: Vec<Box<dyn Strategy>>,
    history: HashMap<String, Vec<Kline>>,
}

impl StrategyRegistry {
    pub fn from_config(config: &BotConfig, params: PlaybookParams) -> Self {
        let mut playbooks: Vec<Box<dyn Strategy>> = Vec::new();

        if config.playbooks.a_enabled {
            playbooks.push(Box::new(BreakoutTrend::new(params.clone())));
        }
        if config.playbooks.b_enabled {
            playbooks.push(Box::new(VwapMeanRevert::new(params.clone())));
        }
        if config.playbooks.c_enabled {
            playbooks.push(Box::new(EventBurst::new(params.clone())));
        }
        if config.playbooks.d_enabled {
            playbooks.push(Box::new(DipPullback::new(params)));
        }

        info!(enabled = playbooks.len(), "registered playbooks");

        Self {
            playbooks,
            history: HashMap::new(),
        }
    }

    /// Fold a closed-candle market event into the pair's rolling history.
    /// Events where `is_candle_closed` is false are ignored — playbooks
    /// only ever see finished bars.
    pub fn ingest_event(&mut self, event: &MarketEvent) {
        if !event.is_candle_closed {
            return;
        }
        let history = self.history.entry(event.pair.clone()).or_default();
        history.push(Kline {
            open_time: event.timestamp,
            open: event.open,
            high: event.high,
            low: event.low,
            close: event.price,
            volume: event.volume,
            close_time: event.timestamp,
        });
        if history.len() > MAX_HISTORY_BARS {
            history.remove(0);
        }
    }

    pub fn history_for(&self, pair: &str) -> &[Kline] {
        self.history.get(pair).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run every enabled playbook against `pair`'s latest snapshot and
    /// history. Returns no signals when the pair fails its quality gates.
    pub fn generate(&self, pair: &str, snapshot: &MarketSnapshot) -> Vec<Signal> {
        if !snapshot.gate_pass {
            return Vec::new();
        }
        let history = self.history_for(pair);
        self.playbooks
            .iter()
            .filter_map(|p| p.evaluate(pair, snapshot, history))
            .collect()
    }
}
