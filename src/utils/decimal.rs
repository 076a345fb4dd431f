//! Decimal arithmetic helpers and conversions between model floats and
//! broker decimals.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Convert a decimal to `f64` for model math.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Convert a model float to a decimal; `None` for non-finite or out-of-range values.
pub fn from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
}

/// Truncate toward zero to a whole number of lots.
pub fn truncate_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).trunc() * lot_size
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_truncate_to_lot() {
        assert_eq!(truncate_to_lot(dec!(12.7), dec!(1)), dec!(12));
        assert_eq!(truncate_to_lot(dec!(-12.7), dec!(1)), dec!(-12));
        assert_eq!(truncate_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(truncate_to_lot(dec!(3.3), Decimal::ZERO), dec!(3.3));
    }

    #[test]
    fn test_float_conversion() {
        assert_eq!(to_f64(dec!(49.5)), 49.5);
        assert_eq!(from_f64(0.25), Some(dec!(0.25)));
        assert_eq!(from_f64(f64::NAN), None);
        assert_eq!(from_f64(f64::INFINITY), None);
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }
}
