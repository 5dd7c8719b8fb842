//! Numeric rounding for float and currency fields.
//!
//! The scaled magnitude is first normalised to 8 decimal places so that
//! binary representation noise (`1.005 * 100 == 100.49999999999999`) does not
//! decide the outcome. Ties are then resolved half-to-even when no precision
//! is given (`None` or `Some(0)`), and half-away-from-zero otherwise.

/// Rounds `value` to `precision` digits after the decimal point.
///
/// # Example
///
/// ```rust
/// use docbase_core::rounding::round_number;
///
/// assert_eq!(round_number(2.5, None), 2.0);
/// assert_eq!(round_number(3.5, None), 4.0);
/// assert_eq!(round_number(1.005, Some(2)), 1.01);
/// assert_eq!(round_number(-2.345, Some(2)), -2.35);
/// ```
#[must_use]
pub fn round_number(value: f64, precision: Option<u32>) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let digits = precision.unwrap_or(0);
    let is_negative = value < 0.0;
    let scale = 10f64.powi(digits as i32);
    let scaled = if digits > 0 {
        value.abs() * scale
    } else {
        value.abs()
    };
    let normalised: f64 = format!("{scaled:.8}").parse().unwrap_or(scaled);

    let integral = normalised.floor();
    let fraction = normalised - integral;
    let rounded = if digits == 0 && fraction == 0.5 {
        if integral % 2.0 == 0.0 {
            integral
        } else {
            integral + 1.0
        }
    } else {
        normalised.round()
    };

    let result = if digits > 0 { rounded / scale } else { rounded };
    if is_negative {
        -result
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unqualified_ties_go_to_even() {
        assert_eq!(round_number(0.5, None), 0.0);
        assert_eq!(round_number(1.5, None), 2.0);
        assert_eq!(round_number(2.5, None), 2.0);
        assert_eq!(round_number(2.5, Some(0)), 2.0);
        assert_eq!(round_number(-2.5, None), -2.0);
        assert_eq!(round_number(-3.5, None), -4.0);
    }

    #[test]
    fn qualified_ties_go_away_from_zero() {
        assert_eq!(round_number(0.125, Some(2)), 0.13);
        assert_eq!(round_number(0.135, Some(2)), 0.14);
        assert_eq!(round_number(2.675, Some(2)), 2.68);
        assert_eq!(round_number(-0.125, Some(2)), -0.13);
    }

    #[test]
    fn representation_noise_is_ignored() {
        assert_eq!(round_number(1.005, Some(2)), 1.01);
        assert_eq!(round_number(1.0049999, Some(2)), 1.0);
    }

    #[test]
    fn non_ties() {
        assert_eq!(round_number(2.4, None), 2.0);
        assert_eq!(round_number(2.6, None), 3.0);
        assert_eq!(round_number(3.14159, Some(3)), 3.142);
        assert_eq!(round_number(10.0, Some(2)), 10.0);
    }

    proptest! {
        #[test]
        fn rounding_is_idempotent(value in -1.0e6f64..1.0e6, digits in 0u32..5) {
            let once = round_number(value, Some(digits));
            prop_assert_eq!(round_number(once, Some(digits)), once);
        }

        #[test]
        fn rounding_is_symmetric(value in 0.0f64..1.0e6, digits in 0u32..5) {
            prop_assert_eq!(
                round_number(-value, Some(digits)),
                -round_number(value, Some(digits))
            );
        }

        #[test]
        fn rounding_stays_within_half_unit(value in -1.0e6f64..1.0e6, digits in 0u32..5) {
            let unit = 10f64.powi(-(digits as i32));
            let rounded = round_number(value, Some(digits));
            prop_assert!((rounded - value).abs() <= unit / 2.0 + 1e-6);
        }
    }
}
