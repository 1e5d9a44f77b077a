//! Mathematical utility functions

use alloy::primitives::U256;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::str::FromStr;

pub fn pow10(n: i32) -> Decimal {
    match n {
        0 => dec!(1),
        6 => dec!(1_000_000),
        18 => dec!(1_000_000_000_000_000_000),
        _ => {
            let mut result = dec!(1);
            if n > 0 {
                for _ in 0..n {
                    result *= dec!(10);
                }
            } else {
                for _ in 0..(-n) {
                    result /= dec!(10);
                }
            }
            result
        }
    }
}

/// `(sell − buy) / buy × 10_000`.
pub fn spread_bps(buy_price: Decimal, sell_price: Decimal) -> Decimal {
    if buy_price.is_zero() {
        return Decimal::ZERO;
    }
    (sell_price - buy_price) / buy_price * dec!(10000)
}

/// Convert a token amount in smallest units to a Decimal with the token's
/// scale. Amounts above Decimal's 96-bit mantissa are clamped to the maximum
/// representable value rather than wrapping.
pub fn units_to_decimal(raw: U256, decimals: u8) -> Decimal {
    match Decimal::from_str(&raw.to_string()) {
        Ok(d) => d / pow10(decimals as i32),
        Err(_) => Decimal::MAX / pow10(decimals as i32),
    }
}

/// Convert a Decimal token amount back to smallest units, truncating any
/// sub-unit remainder.
pub fn decimal_to_units(amount: Decimal, decimals: u8) -> U256 {
    let scaled = (amount * pow10(decimals as i32)).trunc();
    if scaled <= Decimal::ZERO {
        return U256::ZERO;
    }
    U256::from_str(&scaled.to_string()).unwrap_or(U256::ZERO)
}

pub fn wei_to_gwei(wei: u128) -> Decimal {
    Decimal::from(wei) / dec!(1_000_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_matches_glossary_formula() {
        assert_eq!(spread_bps(dec!(100), dec!(101)), dec!(100));
        assert_eq!(spread_bps(dec!(0.8924), dec!(0.8941)).round_dp(2), dec!(19.05));
    }

    #[test]
    fn unit_conversions_round_trip() {
        let raw = U256::from(1_500_000_000_000_000_000u128);
        let dec = units_to_decimal(raw, 18);
        assert_eq!(dec, dec!(1.5));
        assert_eq!(decimal_to_units(dec, 18), raw);
    }

    #[test]
    fn wei_to_gwei_scales() {
        assert_eq!(wei_to_gwei(45_000_000_000), dec!(45));
    }
}
