use serde::{Deserialize, Serialize};

/// Tunable thresholds for the four playbooks, loaded from an optional TOML
/// file (the teacher's `StrategyFileConfig::load` pattern, generalized from
/// one entry per indicator strategy to one shared threshold set). Window
/// sizes the spec states as fixed (20-hour breakout window, 10-bar event
/// window, ...) are not here — only the multipliers the spec calls out as
/// configurable per playbook.
///
/// Example `config/playbooks.toml`:
/// ```toml
/// breakout_stop_atr_mult = 1.0
/// breakout_volume_mult = 1.5
/// target_r_multiple = 2.0
/// vwap_deviation_atr_mult = 1.5
/// vwap_stop_atr_mult = 1.0
/// event_stop_atr_mult = 1.0
/// dip_zscore_threshold = 2.0
/// dip_volume_mult = 2.0
/// dip_stop_atr_mult = 1.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlaybookParams {
    /// Stop distance below the breakout level, in ATR multiples.
    pub breakout_stop_atr_mult: f64,
    /// Volume multiple the last 15m bar must clear vs. the 20-bar average
    /// for Playbook A to confirm a breakout.
    pub breakout_volume_mult: f64,
    /// Target distance from entry, expressed as a multiple of risk (R).
    /// Shared by the playbooks that use a fixed R-multiple target.
    pub target_r_multiple: f64,
    /// How many ATRs price must deviate from session VWAP before Playbook B
    /// treats it as a mean-reversion candidate.
    pub vwap_deviation_atr_mult: f64,
    /// Stop distance beyond entry, in ATR multiples, for Playbook B.
    pub vwap_stop_atr_mult: f64,
    /// Stop distance beyond entry, in ATR multiples, for Playbook C.
    pub event_stop_atr_mult: f64,
    /// How many standard deviations below the 50-bar 15m return mean the
    /// latest return must fall for Playbook D to consider a dip.
    pub dip_zscore_threshold: f64,
    /// Volume multiple the latest 15m bar must clear vs. the 20-bar average
    /// for Playbook D to confirm the dip on volume.
    pub dip_volume_mult: f64,
    /// Stop distance below the 10-bar swing low, in ATR multiples, for
    /// Playbook D.
    pub dip_stop_atr_mult: f64,
}

impl Default for PlaybookParams {
    fn default() -> Self {
        Self {
            breakout_stop_atr_mult: 1.0,
            breakout_volume_mult: 1.5,
            target_r_multiple: 2.0,
            vwap_deviation_atr_mult: 1.5,
            vwap_stop_atr_mult: 1.0,
            event_stop_atr_mult: 1.0,
            dip_zscore_threshold: 2.0,
            dip_volume_mult: 2.0,
            dip_stop_atr_mult: 1.0,
        }
    }
}

impl PlaybookParams {
    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits. Panics on a malformed file — an operator error that
    /// should surface at boot, not be silently swallowed.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read playbook config at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("failed to parse playbook config at '{path}': {e}"))
    }
}
