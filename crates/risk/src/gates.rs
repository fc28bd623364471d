use chrono::{DateTime, Utc};

use common::{BotConfig, BotState, BotStatus, Playbook, Position, RejectionReason, Signal, SizingDecision};

/// Entry prices above this are almost certainly a bad tick or a unit error,
/// not a real candidate (spec.md §4.5(a)).
const MAX_SANE_ENTRY_PRICE: f64 = 10_000_000.0;

/// Maximum fraction the current market price may have drifted from the
/// signal's recorded entry before the signal is considered stale (spec.md
/// §4.5(c)).
const MAX_PRICE_DEVIATION_PCT: f64 = 0.50;

/// Ordered pre-trade checks, run in the exact order spec.md §4.5 lists them
/// (a)-(g). Stops at the first failure so the rejection reason always names
/// the actual blocking gate, not a downstream symptom.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_pretrade_gates(
    signal: &Signal,
    sizing: &SizingDecision,
    config: &BotConfig,
    state: &BotState,
    open_positions: &[Position],
    current_price: f64,
    now: DateTime<Utc>,
) -> Result<(), RejectionReason> {
    entry_price_sanity(signal)?; // (a)
    stop_required(signal)?; // (b)
    price_deviation(signal, current_price)?; // (c)
    portfolio_heat(signal, sizing, open_positions, state, config)?; // (d)
    max_positions(open_positions, config)?;
    exposure(sizing, state, config)?;
    reserve_floor(sizing, state, config)?;
    cooldown(signal, config, state, now)?; // (e)
    playbook_caps(signal, config, state)?; // (f)
    engine_status(state)?; // (g)
    Ok(())
}

fn reject(gate: &str, reason: impl Into<String>) -> RejectionReason {
    RejectionReason {
        gate: gate.to_string(),
        reason: reason.into(),
    }
}

/// spec.md §4.5(a): `0 < entry ≤ $10,000,000`.
fn entry_price_sanity(signal: &Signal) -> Result<(), RejectionReason> {
    if signal.entry_price <= 0.0 || signal.entry_price > MAX_SANE_ENTRY_PRICE {
        return Err(reject(
            "entry_price_sanity",
            format!(
                "entry price {:.8} outside the sane range (0, {MAX_SANE_ENTRY_PRICE}]",
                signal.entry_price
            ),
        ));
    }
    Ok(())
}

/// spec.md §4.5(b): a stop is required for every new position, plus the
/// rest of the signal's directional-ordering validity.
fn stop_required(signal: &Signal) -> Result<(), RejectionReason> {
    if signal.stop_price <= 0.0 {
        return Err(reject("stop_required", "signal carries no stop price"));
    }
    if !signal.is_valid() {
        return Err(reject("stop_required", "entry/stop/target fail directional ordering"));
    }
    Ok(())
}

/// spec.md §4.5(c): reject a candidate whose signal-time entry has drifted
/// too far from the current market price to still be actionable.
fn price_deviation(signal: &Signal, current_price: f64) -> Result<(), RejectionReason> {
    if current_price <= 0.0 {
        return Ok(());
    }
    let deviation = (current_price - signal.entry_price).abs() / current_price;
    if deviation > MAX_PRICE_DEVIATION_PCT {
        return Err(reject(
            "price_deviation",
            format!(
                "current price {current_price:.8} has drifted {:.1}% from signal entry {:.8}, over the {:.0}% limit",
                deviation * 100.0,
                signal.entry_price,
                MAX_PRICE_DEVIATION_PCT * 100.0
            ),
        ));
    }
    Ok(())
}

fn engine_status(state: &BotState) -> Result<(), RejectionReason> {
    if state.status != BotStatus::Running {
        return Err(reject(
            "engine_status",
            format!("bot is {:?}, not accepting new signals", state.status),
        ));
    }
    Ok(())
}

/// spec.md §4.5(e): per-pair cooldown between signals.
fn cooldown(signal: &Signal, config: &BotConfig, state: &BotState, now: DateTime<Utc>) -> Result<(), RejectionReason> {
    if !state.cooldown_elapsed(&signal.pair, config.cooldown_minutes, now) {
        return Err(reject(
            "cooldown",
            format!("{} is within its {}-minute cooldown", signal.pair, config.cooldown_minutes),
        ));
    }
    Ok(())
}

/// spec.md §4.5(f): playbook-specific caps, e.g. Playbook B's per-session
/// trade count.
fn playbook_caps(signal: &Signal, config: &BotConfig, state: &BotState) -> Result<(), RejectionReason> {
    if signal.playbook == Playbook::B {
        let count = state
            .playbook_b_session_counts
            .get(&signal.pair)
            .copied()
            .unwrap_or(0);
        if count >= config.playbooks.b_max_trades_per_session {
            return Err(reject(
                "playbook_caps",
                format!(
                    "playbook B has used {count}/{} session trades on {}",
                    config.playbooks.b_max_trades_per_session, signal.pair
                ),
            ));
        }
    }
    Ok(())
}

fn max_positions(open_positions: &[Position], config: &BotConfig) -> Result<(), RejectionReason> {
    if open_positions.len() as u32 >= config.max_concurrent_positions {
        return Err(reject(
            "max_positions",
            format!(
                "{} open positions already at the {} cap",
                open_positions.len(),
                config.max_concurrent_positions
            ),
        ));
    }
    Ok(())
}

fn exposure(sizing: &SizingDecision, state: &BotState, config: &BotConfig) -> Result<(), RejectionReason> {
    let cap = state.current_equity * config.max_exposure_pct;
    if sizing.notional_quote > cap + 1e-9 {
        return Err(reject(
            "exposure",
            format!(
                "notional {:.2} exceeds the per-trade cap {:.2} ({:.1}% of equity)",
                sizing.notional_quote,
                cap,
                config.max_exposure_pct * 100.0
            ),
        ));
    }
    Ok(())
}

/// Sum of `risk_amount()` across open positions plus the candidate's own
/// risk must stay under `max_portfolio_heat_pct` of current equity.
fn portfolio_heat(
    signal: &Signal,
    sizing: &SizingDecision,
    open_positions: &[Position],
    state: &BotState,
    config: &BotConfig,
) -> Result<(), RejectionReason> {
    let existing_heat: f64 = open_positions.iter().map(Position::risk_amount).sum();
    let candidate_risk = signal.risk_per_unit() * sizing.quantity;
    let total_heat = existing_heat + candidate_risk;
    let cap = state.current_equity * config.max_portfolio_heat_pct;
    if total_heat > cap + 1e-9 {
        return Err(reject(
            "portfolio_heat",
            format!(
                "portfolio heat would reach {:.2} against a {:.2} cap ({:.1}% of equity)",
                total_heat,
                cap,
                config.max_portfolio_heat_pct * 100.0
            ),
        ));
    }
    Ok(())
}

fn reserve_floor(sizing: &SizingDecision, state: &BotState, config: &BotConfig) -> Result<(), RejectionReason> {
    let remaining = state.current_equity - sizing.notional_quote;
    let floor = state.current_equity * config.reserve_floor_pct;
    if remaining < floor - 1e-9 {
        return Err(reject(
            "reserve_floor",
            format!(
                "would leave {remaining:.2} unallocated, below the {floor:.2} reserve floor"
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderSide;

    fn signal() -> Signal {
        Signal {
            pair: "BTCUSDT".to_string(),
            playbook: Playbook::A,
            side: OrderSide::Buy,
            entry_price: 100.0,
            stop_price: 95.0,
            target_price: Some(115.0),
            is_event: false,
            reason: "test".to_string(),
            session_vwap: 100.0,
        }
    }

    fn sizing(notional: f64, quantity: f64) -> SizingDecision {
        SizingDecision {
            kelly_fraction: 0.1,
            adjusted_fraction: notional / 10_000.0,
            notional_quote: notional,
            quantity,
            reasoning: vec![],
            risk_tier: common::RiskTier::Moderate,
        }
    }

    #[test]
    fn halted_engine_blocks_every_signal() {
        let mut state = BotState::new(10_000.0);
        state.status = BotStatus::HaltedDaily;
        let config = BotConfig::default();
        let err =
            evaluate_pretrade_gates(&signal(), &sizing(100.0, 1.0), &config, &state, &[], 100.0, Utc::now())
                .unwrap_err();
        assert_eq!(err.gate, "engine_status");
    }

    #[test]
    fn entry_price_sanity_rejects_absurd_entry() {
        let state = BotState::new(10_000.0);
        let config = BotConfig::default();
        let mut sig = signal();
        sig.entry_price = 20_000_000.0;
        let err =
            evaluate_pretrade_gates(&sig, &sizing(100.0, 1.0), &config, &state, &[], 20_000_000.0, Utc::now())
                .unwrap_err();
        assert_eq!(err.gate, "entry_price_sanity");
    }

    #[test]
    fn stop_required_rejects_zero_stop() {
        let state = BotState::new(10_000.0);
        let config = BotConfig::default();
        let mut sig = signal();
        sig.stop_price = 0.0;
        let err = evaluate_pretrade_gates(&sig, &sizing(100.0, 1.0), &config, &state, &[], 100.0, Utc::now())
            .unwrap_err();
        assert_eq!(err.gate, "stop_required");
    }

    #[test]
    fn price_deviation_rejects_stale_signal() {
        let state = BotState::new(10_000.0);
        let config = BotConfig::default();
        // signal entry is 100.0; current price has drifted to 200.0 (100%).
        let err = evaluate_pretrade_gates(&signal(), &sizing(100.0, 1.0), &config, &state, &[], 200.0, Utc::now())
            .unwrap_err();
        assert_eq!(err.gate, "price_deviation");
    }

    #[test]
    fn cooldown_blocks_rapid_reentry() {
        let mut state = BotState::new(10_000.0);
        state.last_signal_at.insert("BTCUSDT".to_string(), Utc::now());
        let config = BotConfig::default();
        let err =
            evaluate_pretrade_gates(&signal(), &sizing(100.0, 1.0), &config, &state, &[], 100.0, Utc::now())
                .unwrap_err();
        assert_eq!(err.gate, "cooldown");
    }

    #[test]
    fn exposure_cap_rejects_oversized_notional() {
        let state = BotState::new(10_000.0);
        let config = BotConfig::default(); // max_exposure_pct = 0.10 -> cap 1000
        let err =
            evaluate_pretrade_gates(&signal(), &sizing(5_000.0, 50.0), &config, &state, &[], 100.0, Utc::now())
                .unwrap_err();
        assert_eq!(err.gate, "exposure");
    }

    #[test]
    fn reserve_floor_rejects_when_too_little_would_remain() {
        let state = BotState::new(1_000.0);
        let mut config = BotConfig::default();
        config.max_exposure_pct = 1.0; // disable the exposure gate for this test
        let err =
            evaluate_pretrade_gates(&signal(), &sizing(950.0, 9.5), &config, &state, &[], 100.0, Utc::now())
                .unwrap_err();
        assert_eq!(err.gate, "reserve_floor");
    }

    #[test]
    fn well_formed_signal_within_limits_passes() {
        let state = BotState::new(10_000.0);
        let config = BotConfig::default();
        let result =
            evaluate_pretrade_gates(&signal(), &sizing(500.0, 5.0), &config, &state, &[], 100.0, Utc::now());
        assert!(result.is_ok());
    }
}
