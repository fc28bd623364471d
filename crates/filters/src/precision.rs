/// Fixed-point scale used for all filter arithmetic. Venue tick/step sizes
/// never carry more than 8 decimal places, so scaling to this many integer
/// units and comparing with integer modulo sidesteps the floating-point
/// drift a direct `qty % step` would introduce (spec.md §4.2).
const SCALE: f64 = 100_000_000.0;

fn to_scaled(value: f64) -> i64 {
    (value * SCALE).round() as i64
}

/// Whether `value` is an exact multiple of `step`, evaluated in scaled-
/// integer space. A `step` of zero (no constraint configured) always
/// passes.
pub fn is_multiple_of(value: f64, step: f64) -> bool {
    if step <= 0.0 {
        return true;
    }
    let scaled_step = to_scaled(step);
    if scaled_step == 0 {
        return true;
    }
    to_scaled(value) % scaled_step == 0
}

/// Round `value` down to the nearest multiple of `step` (never rounds up,
/// so the result never exceeds an account's available balance).
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    let scaled_step = to_scaled(step);
    if scaled_step == 0 {
        return value;
    }
    let scaled_value = to_scaled(value);
    let floored = (scaled_value / scaled_step) * scaled_step;
    floored as f64 / SCALE
}

/// Round `value` down to the nearest multiple of `tick` (spec.md §4.2:
/// "price is floor-snapped to tick size... Floor is mandatory"). Same
/// direction as `floor_to_step`; kept as a separate name because price and
/// quantity snap against different venue filters (`PRICE_FILTER` vs
/// `LOT_SIZE`) even though the arithmetic is identical.
pub fn floor_to_tick(value: f64, tick: f64) -> f64 {
    floor_to_step(value, tick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_passes() {
        assert!(is_multiple_of(1.234, 0.001));
        assert!(is_multiple_of(1.0, 1.0));
    }

    #[test]
    fn non_multiple_fails() {
        assert!(!is_multiple_of(1.2345, 0.001));
    }

    #[test]
    fn floor_rounds_down_not_up() {
        let floored = floor_to_step(1.2399, 0.001);
        assert!((floored - 1.239).abs() < 1e-9);
    }

    #[test]
    fn tick_floors_never_rounds_up() {
        // 100.008 is closer to 100.01 than 100.00, but floor snapping must
        // still land on 100.00 — never request a price better than quoted.
        let floored = floor_to_tick(100.008, 0.01);
        assert!((floored - 100.00).abs() < 1e-9);
    }

    #[test]
    fn zero_step_is_a_no_op() {
        assert_eq!(floor_to_step(1.23456, 0.0), 1.23456);
        assert!(is_multiple_of(1.23456, 0.0));
    }
}
