//! Exchange price-tick and spread-band tables (spec §4.2 items 7 and 8).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Minimum legal price increment for a lay price, per the exchange's tick
/// ladder. Used by JOFS to decide whether two runners are "within one tick"
/// of each other, rather than comparing raw decimal proximity.
#[must_use]
pub fn price_tick(price: Decimal) -> Decimal {
    if price < dec!(2) {
        dec!(0.01)
    } else if price < dec!(3) {
        dec!(0.02)
    } else if price < dec!(4) {
        dec!(0.05)
    } else if price < dec!(6) {
        dec!(0.1)
    } else if price < dec!(10) {
        dec!(0.2)
    } else if price < dec!(20) {
        dec!(0.5)
    } else if price < dec!(30) {
        dec!(1)
    } else if price < dec!(50) {
        dec!(2)
    } else {
        dec!(5)
    }
}

/// Rounds `price` to the nearest legal increment for its own price band
/// (spec §6: "Price must snap to the exchange tick table"). Rule-evaluator
/// prices already come from a live book and are tick-valid, but a bet
/// submitted some ticks after evaluation must still round trip through a
/// validator that assumes nothing about its caller.
#[must_use]
pub fn snap_to_tick(price: Decimal) -> Decimal {
    let tick = price_tick(price);
    (price / tick).round() * tick
}

/// Maximum allowed lay-minus-back spread for a runner at the given lay
/// price, or `None` if the spread is rejected unconditionally (price band
/// `>= 8.0`).
#[must_use]
pub fn spread_band_threshold(lay_price: Decimal) -> Option<Decimal> {
    if lay_price < dec!(1.0) {
        None
    } else if lay_price < dec!(2.0) {
        Some(dec!(0.05))
    } else if lay_price < dec!(3.0) {
        Some(dec!(0.15))
    } else if lay_price < dec!(5.0) {
        Some(dec!(0.30))
    } else if lay_price < dec!(8.0) {
        Some(dec!(0.50))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_table_boundaries() {
        assert_eq!(price_tick(dec!(1.99)), dec!(0.01));
        assert_eq!(price_tick(dec!(2.00)), dec!(0.02));
        assert_eq!(price_tick(dec!(5.99)), dec!(0.1));
        assert_eq!(price_tick(dec!(6.00)), dec!(0.2));
        assert_eq!(price_tick(dec!(100)), dec!(5));
    }

    #[test]
    fn snap_to_tick_rounds_within_own_band() {
        assert_eq!(snap_to_tick(dec!(1.015)), dec!(1.02));
        assert_eq!(snap_to_tick(dec!(7.03)), dec!(7.0));
    }

    #[test]
    fn spread_band_boundaries() {
        assert_eq!(spread_band_threshold(dec!(1.5)), Some(dec!(0.05)));
        assert_eq!(spread_band_threshold(dec!(2.0)), Some(dec!(0.15)));
        assert_eq!(spread_band_threshold(dec!(3.0)), Some(dec!(0.30)));
        assert_eq!(spread_band_threshold(dec!(5.0)), Some(dec!(0.50)));
        assert_eq!(spread_band_threshold(dec!(8.0)), None);
        assert_eq!(spread_band_threshold(dec!(20.0)), None);
    }
}
