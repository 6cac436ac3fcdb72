//! Fixed-point helpers shared by the ledger.
//!
//! Amounts, shares and prices are `u128` values in 18-decimal fixed point. Products of
//! two such values do not fit in 128 bits, so every multiply-then-divide goes through a
//! 256-bit intermediate.

use ethnum::U256;
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const FIXED_POINT_SCALE: u128 = 1_000_000_000_000_000_000;
pub const FIXED_POINT_DECIMALS: u32 = 18;
pub const BASIS_POINTS_SCALE: u128 = 10_000;

/// Computes `a * b / c` rounding down. Saturates at `u128::MAX`.
///
/// Panics if `c` is zero.
pub fn mul_div(a: u128, b: u128, c: u128) -> u128 {
    assert!(c != 0, "mul_div by zero");
    let result = U256::from(a) * U256::from(b) / U256::from(c);
    if result > U256::from(u128::MAX) {
        u128::MAX
    } else {
        result.as_u128()
    }
}

/// Converts a basis point figure into a fixed-point fraction (`500` becomes `0.05`).
pub fn fixed_from_bps(bps: u16) -> u128 {
    mul_div(bps as u128, FIXED_POINT_SCALE, BASIS_POINTS_SCALE)
}

pub fn to_decimal(amount: u128) -> Decimal {
    i128::try_from(amount)
        .ok()
        .and_then(|mantissa| Decimal::try_from_i128_with_scale(mantissa, FIXED_POINT_DECIMALS).ok())
        .unwrap_or(Decimal::MAX)
}

pub fn to_f64(amount: u128) -> f64 {
    to_decimal(amount).to_f64().unwrap_or(f64::MAX)
}

/// Renders a fixed-point fraction as a percentage, e.g. `0.05` as `5`.
pub fn to_percent(fraction: u128) -> Decimal {
    to_decimal(fraction) * dec!(100)
}
