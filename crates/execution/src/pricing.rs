use common::{OrderBookTop, OrderSide};

/// Maker offset added inside the spread for a maker-first limit price,
/// expressed in basis points (documented as 0.05% in spec.md §9's own
/// open question about the constant — both describe the same number, this
/// is the one place it lives).
pub const MAKER_OFFSET_BPS: f64 = 5.0;

/// Ceiling on the total maker-first price adjustment versus the signal's
/// own entry price. Beyond this the book has moved too far to chase and
/// the router should fall back to a market price instead.
const MAX_ADJUSTMENT_BPS: f64 = 50.0;

/// Compute a maker-first limit price from top-of-book for a non-event
/// signal: for BUY, the lesser of (best_bid + offset) and a price 10% of
/// the spread inside the ask; the inverse for SELL. Returns `None` when
/// the adjustment versus `reference_price` would exceed 50 bps, signalling
/// the caller should submit at market instead.
pub fn maker_first_price(side: OrderSide, book: &OrderBookTop, reference_price: f64) -> Option<f64> {
    let spread = book.best_ask - book.best_bid;
    if spread <= 0.0 || reference_price <= 0.0 {
        return None;
    }

    let offset = book.best_bid * MAKER_OFFSET_BPS / 10_000.0;
    let price = match side {
        OrderSide::Buy => (book.best_bid + offset).min(book.best_ask - spread * 0.10),
        OrderSide::Sell => (book.best_ask - offset).max(book.best_bid + spread * 0.10),
    };

    let adjustment_bps = 10_000.0 * (price - reference_price).abs() / reference_price;
    if adjustment_bps > MAX_ADJUSTMENT_BPS {
        return None;
    }
    Some(price)
}

/// Bias a maker-first price halfway toward session VWAP when VWAP sits on
/// the favorable side of the price (spec.md §4.6 price-shaping step 2): a
/// BUY priced above VWAP moves down toward the VWAP midpoint, a SELL priced
/// below VWAP moves up toward it. A signal whose VWAP is already on the
/// unfavorable side (or equal to the price) is left untouched.
pub fn bias_toward_vwap(side: OrderSide, price: f64, session_vwap: f64) -> f64 {
    if session_vwap <= 0.0 {
        return price;
    }
    match side {
        OrderSide::Buy if price > session_vwap => (price + session_vwap) / 2.0,
        OrderSide::Sell if price < session_vwap => (price + session_vwap) / 2.0,
        _ => price,
    }
}

/// Slippage in basis points between an order's final average fill price
/// and the signal's entry price at the time it was approved.
pub fn slippage_bps(fill_price: f64, signal_entry_price: f64) -> f64 {
    if signal_entry_price <= 0.0 {
        return 0.0;
    }
    10_000.0 * (fill_price - signal_entry_price).abs() / signal_entry_price
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(bid: f64, ask: f64) -> OrderBookTop {
        OrderBookTop {
            best_bid: bid,
            best_bid_qty: 1.0,
            best_ask: ask,
            best_ask_qty: 1.0,
        }
    }

    #[test]
    fn buy_prices_inside_the_spread_near_the_bid() {
        let price = maker_first_price(OrderSide::Buy, &book(100.0, 100.10), 100.05).unwrap();
        assert!(price > 100.0 && price < 100.10);
    }

    #[test]
    fn sell_prices_inside_the_spread_near_the_ask() {
        let price = maker_first_price(OrderSide::Sell, &book(100.0, 100.10), 100.05).unwrap();
        assert!(price > 100.0 && price < 100.10);
    }

    #[test]
    fn excessive_adjustment_falls_back_to_market() {
        // Reference price far from the book: adjustment exceeds 50 bps.
        let price = maker_first_price(OrderSide::Buy, &book(100.0, 100.10), 50.0);
        assert!(price.is_none());
    }

    #[test]
    fn buy_above_vwap_moves_down_to_the_midpoint() {
        let biased = bias_toward_vwap(OrderSide::Buy, 110.0, 100.0);
        assert!((biased - 105.0).abs() < 1e-9);
    }

    #[test]
    fn sell_below_vwap_moves_up_to_the_midpoint() {
        let biased = bias_toward_vwap(OrderSide::Sell, 90.0, 100.0);
        assert!((biased - 95.0).abs() < 1e-9);
    }

    #[test]
    fn buy_below_vwap_is_left_alone() {
        let biased = bias_toward_vwap(OrderSide::Buy, 90.0, 100.0);
        assert!((biased - 90.0).abs() < 1e-9);
    }

    #[test]
    fn slippage_is_symmetric_in_direction() {
        assert!((slippage_bps(101.0, 100.0) - 100.0).abs() < 1e-9);
        assert!((slippage_bps(99.0, 100.0) - 100.0).abs() < 1e-9);
    }
}
