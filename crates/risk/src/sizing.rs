use common::{BotState, Playbook, RiskTier, Signal, SizingDecision};

/// Conservative cap applied to the raw Kelly fraction — never risk more
/// than a quarter of what full Kelly would suggest (spec.md §4.5).
const QUARTER_KELLY: f64 = 0.25;

/// Fallback inputs used until a playbook has at least
/// `common::PLAYBOOK_MIN_TRADES_FOR_STATS` recorded trades (spec.md §4.5:
/// "With fewer than 5 playbook trades, use defaults").
const DEFAULT_P: f64 = 0.5;
const DEFAULT_B: f64 = 1.5;
const DEFAULT_C: f64 = 0.5;

/// Above this drawdown from peak equity, position size is damped further
/// (spec.md §4.5 risk adjustment 1).
const DRAWDOWN_DAMPING_THRESHOLD: f64 = 0.05;

/// Above this stop-distance-as-fraction-of-entry, position size is
/// normalized back down toward it (spec.md §4.5 risk adjustment 2).
const NORMAL_STOP_DISTANCE_PCT: f64 = 0.03;

/// Below this many recorded trades, size is dampened proportionally to the
/// sample (spec.md §4.5 risk adjustment 3).
const SAMPLE_DAMPENING_FLOOR: usize = 20;

/// Hard ceiling on position size regardless of edge (spec.md §4.5 risk
/// adjustment 4), independent of — and potentially tighter or looser than —
/// the user's configured `max_exposure_pct`.
const HARD_EXPOSURE_CAP_PCT: f64 = 0.10;

/// Hard floor on notional size for any trade Kelly still wants to take
/// (spec.md §4.5 risk adjustment 4).
const HARD_NOTIONAL_FLOOR: f64 = 100.0;

/// Compute a `SizingDecision` from a signal and the account's live state.
///
/// Implements spec.md §4.5 end to end:
/// - `p`/`b` are derived from the playbook's trailing ≤100-trade history on
///   `state`, or the spec's fixed defaults when fewer than 5 trades exist.
/// - confidence `c` blends a sample-size factor with an edge-expectancy
///   factor, both clipped to `[0, 1]`.
/// - `raw = (b·p − (1−p))/b`, `kelly = max(0, raw · c · 0.25)`.
/// - four ordered risk adjustments (drawdown damping, stop-width
///   normalization, sample dampening, hard cap/floor) are then applied in
///   sequence, each logged to `reasoning` for auditability.
pub fn size_signal(signal: &Signal, state: &BotState, max_exposure_pct: f64) -> SizingDecision {
    let mut reasoning = Vec::new();

    let (p, b, n) = match state.playbook_kelly_inputs(signal.playbook) {
        Some(inputs) => (inputs.p, inputs.b, inputs.n),
        None => {
            reasoning.push(format!(
                "fewer than {} trades recorded for playbook {:?}, using defaults p={DEFAULT_P}, b={DEFAULT_B}, c={DEFAULT_C}",
                common::PLAYBOOK_MIN_TRADES_FOR_STATS,
                signal.playbook,
            ));
            (DEFAULT_P, DEFAULT_B, 0)
        }
    };

    let c = confidence(p, b, n, signal.playbook, &mut reasoning);

    let raw = if b > 0.0 { (b * p - (1.0 - p)) / b } else { 0.0 };
    let mut kelly = (raw * c * QUARTER_KELLY).max(0.0);
    reasoning.push(format!(
        "kelly {kelly:.4} from raw={raw:.4}, c={c:.2}, quarter_kelly={QUARTER_KELLY:.2} (p={p:.2}, b={b:.2}, n={n})"
    ));

    if kelly > 0.0 {
        // 1. Drawdown damping.
        let drawdown = state.drawdown_pct();
        if drawdown > DRAWDOWN_DAMPING_THRESHOLD {
            let mult = (1.0 - 2.0 * drawdown).max(0.5);
            kelly *= mult;
            reasoning.push(format!(
                "drawdown damping: {:.1}% drawdown from peak, x{mult:.2} -> {kelly:.4}",
                drawdown * 100.0
            ));
        }

        // 2. Stop-width normalization.
        let stop_distance_pct = if signal.entry_price > 0.0 {
            signal.risk_per_unit() / signal.entry_price
        } else {
            0.0
        };
        if stop_distance_pct > NORMAL_STOP_DISTANCE_PCT {
            let mult = NORMAL_STOP_DISTANCE_PCT / stop_distance_pct;
            kelly *= mult;
            reasoning.push(format!(
                "stop-width normalization: stop is {:.2}% away, x{mult:.2} -> {kelly:.4}",
                stop_distance_pct * 100.0
            ));
        }

        // 3. Sample dampening.
        if n < SAMPLE_DAMPENING_FLOOR {
            let mult = n as f64 / SAMPLE_DAMPENING_FLOOR as f64;
            kelly *= mult;
            reasoning.push(format!(
                "sample dampening: {n}/{SAMPLE_DAMPENING_FLOOR} playbook trades, x{mult:.2} -> {kelly:.4}"
            ));
        }
    }

    // 4. Hard cap (always 10% of equity, tighter of that or the user's
    // configured exposure limit) and hard floor ($100 notional, only for a
    // trade Kelly still wants to take at all).
    let capped_fraction = kelly.min(HARD_EXPOSURE_CAP_PCT).min(max_exposure_pct.max(0.0));
    reasoning.push(format!(
        "hard cap: min({kelly:.4}, {HARD_EXPOSURE_CAP_PCT:.2} hard, {max_exposure_pct:.2} configured) = {capped_fraction:.4}"
    ));

    let mut notional_quote = capped_fraction * state.current_equity;
    if capped_fraction > 0.0 && notional_quote < HARD_NOTIONAL_FLOOR {
        reasoning.push(format!("hard floor: {notional_quote:.2} raised to ${HARD_NOTIONAL_FLOOR:.0}"));
        notional_quote = HARD_NOTIONAL_FLOOR;
    }

    let adjusted_fraction = if state.current_equity > 0.0 {
        notional_quote / state.current_equity
    } else {
        0.0
    };
    let quantity = if signal.entry_price > 0.0 {
        notional_quote / signal.entry_price
    } else {
        0.0
    };

    let risk_tier = if capped_fraction < 0.02 {
        RiskTier::Conservative
    } else if capped_fraction < 0.05 {
        RiskTier::Moderate
    } else {
        RiskTier::Aggressive
    };

    SizingDecision {
        kelly_fraction: raw,
        adjusted_fraction,
        notional_quote,
        quantity,
        reasoning,
        risk_tier,
    }
}

/// Blend of the sample-size factor `min(1, n/100)` and the edge-expectancy
/// factor `p·b − (1−p)` (each clipped to `[0, 1]`), per spec.md §4.5. Below
/// the minimum trade count the spec's fixed `c=0.5` applies directly instead.
fn confidence(p: f64, b: f64, n: usize, playbook: Playbook, reasoning: &mut Vec<String>) -> f64 {
    if n < common::PLAYBOOK_MIN_TRADES_FOR_STATS {
        return DEFAULT_C;
    }
    let sample_factor = (n as f64 / 100.0).min(1.0);
    let edge_factor = (p * b - (1.0 - p)).clamp(0.0, 1.0);
    let c = ((sample_factor + edge_factor) / 2.0).clamp(0.0, 1.0);
    reasoning.push(format!(
        "confidence for {playbook:?}: sample_factor={sample_factor:.2}, edge_factor={edge_factor:.2} -> c={c:.2}"
    ));
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BotState, OrderSide};

    fn signal(entry: f64, stop: f64, target: f64) -> Signal {
        Signal {
            pair: "BTCUSDT".to_string(),
            playbook: Playbook::B,
            side: OrderSide::Buy,
            entry_price: entry,
            stop_price: stop,
            target_price: Some(target),
            is_event: false,
            reason: "test".to_string(),
            session_vwap: entry,
        }
    }

    #[test]
    fn cold_start_with_no_history_sizes_to_zero() {
        let state = BotState::new(10_000.0);
        let sig = signal(100.0, 99.0, 103.0);
        let decision = size_signal(&sig, &state, 0.10);
        // Defaults give a small positive edge, but sample dampening at n=0
        // (no trade history at all yet) zeroes it before the floor applies.
        assert_eq!(decision.notional_quote, 0.0);
    }

    #[test]
    fn thin_sample_with_edge_is_dampened_but_still_floored() {
        let mut state = BotState::new(10_000.0);
        // 6 trades, 4 wins at 2R and 2 losses at 1R: clear positive edge,
        // but well short of the 20-trade dampening floor.
        for _ in 0..4 {
            state.record_trade_outcome(Playbook::B, 2.0);
        }
        for _ in 0..2 {
            state.record_trade_outcome(Playbook::B, -1.0);
        }
        let sig = signal(100.0, 99.0, 106.0);
        let decision = size_signal(&sig, &state, 0.10);
        assert!(decision.notional_quote >= 100.0 - 1e-9);
    }

    #[test]
    fn sizing_never_exceeds_hard_exposure_cap() {
        let mut state = BotState::new(10_000.0);
        for _ in 0..100 {
            state.record_trade_outcome(Playbook::B, 3.0); // every trade a big win
        }
        let sig = signal(100.0, 99.0, 130.0);
        let decision = size_signal(&sig, &state, 1.0); // configured cap disabled
        assert!(decision.adjusted_fraction <= 0.10 + 1e-9);
    }

    #[test]
    fn wide_stop_gets_normalized_down() {
        let mut state = BotState::new(10_000.0);
        for _ in 0..30 {
            state.record_trade_outcome(Playbook::B, 1.0);
        }
        let tight = signal(100.0, 99.0, 110.0); // 1% stop
        let wide = signal(100.0, 90.0, 110.0); // 10% stop
        let tight_decision = size_signal(&tight, &state, 0.10);
        let wide_decision = size_signal(&wide, &state, 0.10);
        assert!(wide_decision.adjusted_fraction <= tight_decision.adjusted_fraction);
    }

    #[test]
    fn losing_edge_sizes_to_zero() {
        let mut state = BotState::new(10_000.0);
        for _ in 0..50 {
            state.record_trade_outcome(Playbook::B, -1.0); // all losses
        }
        let sig = signal(100.0, 99.0, 101.0);
        let decision = size_signal(&sig, &state, 0.10);
        assert_eq!(decision.notional_quote, 0.0);
        assert_eq!(decision.quantity, 0.0);
    }

    #[test]
    fn quantity_matches_notional_over_entry_price() {
        let mut state = BotState::new(10_000.0);
        for _ in 0..40 {
            state.record_trade_outcome(Playbook::B, 1.5);
        }
        let sig = signal(50.0, 49.0, 55.0);
        let decision = size_signal(&sig, &state, 0.10);
        let expected_qty = decision.notional_quote / 50.0;
        assert!((decision.quantity - expected_qty).abs() < 1e-9);
    }
}
