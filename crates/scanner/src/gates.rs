use common::BotConfig;

/// Evaluate the market-quality gates a pair must clear before it is
/// eligible for any playbook (spec.md §4.3): minimum 24h quote volume,
/// maximum spread, and minimum top-of-book depth on both sides.
///
/// Returns `(pass, fail_reasons)`; `fail_reasons` is empty iff `pass`.
pub fn evaluate_gates(
    quote_volume_24h: f64,
    spread_bps: f64,
    best_bid_qty: f64,
    best_bid: f64,
    best_ask_qty: f64,
    best_ask: f64,
    config: &BotConfig,
) -> (bool, Vec<String>) {
    let mut reasons = Vec::new();

    if quote_volume_24h < config.min_volume_quote {
        reasons.push(format!(
            "quote_volume_24h {quote_volume_24h} below minimum {}",
            config.min_volume_quote
        ));
    }

    if spread_bps > config.max_spread_bps {
        reasons.push(format!(
            "spread {spread_bps}bps above maximum {}bps",
            config.max_spread_bps
        ));
    }

    let bid_depth_quote = best_bid_qty * best_bid;
    let ask_depth_quote = best_ask_qty * best_ask;
    let min_depth = bid_depth_quote.min(ask_depth_quote);
    if min_depth < config.min_tob_depth_quote {
        reasons.push(format!(
            "top-of-book depth {min_depth} below minimum {}",
            config.min_tob_depth_quote
        ));
    }

    (reasons.is_empty(), reasons)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BotConfig {
        BotConfig {
            min_volume_quote: 1_000_000.0,
            max_spread_bps: 10.0,
            min_tob_depth_quote: 5_000.0,
            ..BotConfig::default()
        }
    }

    #[test]
    fn passes_when_every_gate_clears() {
        let (pass, reasons) = evaluate_gates(2_000_000.0, 5.0, 10.0, 1000.0, 10.0, 1000.0, &config());
        assert!(pass);
        assert!(reasons.is_empty());
    }

    #[test]
    fn fails_on_low_volume() {
        let (pass, reasons) = evaluate_gates(500_000.0, 5.0, 10.0, 1000.0, 10.0, 1000.0, &config());
        assert!(!pass);
        assert_eq!(reasons.len(), 1);
    }

    #[test]
    fn fails_on_wide_spread() {
        let (pass, reasons) = evaluate_gates(2_000_000.0, 50.0, 10.0, 1000.0, 10.0, 1000.0, &config());
        assert!(!pass);
        assert_eq!(reasons.len(), 1);
    }

    #[test]
    fn fails_on_thin_depth() {
        let (pass, reasons) = evaluate_gates(2_000_000.0, 5.0, 0.1, 1000.0, 0.1, 1000.0, &config());
        assert!(!pass);
        assert_eq!(reasons.len(), 1);
    }

    #[test]
    fn accumulates_multiple_failures() {
        let (pass, reasons) = evaluate_gates(100.0, 500.0, 0.01, 1.0, 0.01, 1.0, &config());
        assert!(!pass);
        assert_eq!(reasons.len(), 3);
    }
}
