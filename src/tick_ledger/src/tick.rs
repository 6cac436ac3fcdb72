//! Tick keys.
//!
//! A tick identifies one liquidity bucket. On the wire it is a packed `u128`:
//!
//! ```text
//! +----------------------------------------------------------+
//! |                          128                             |
//! +-----------------------------+----------+--------+--------+
//! |             120             |    3     |   3    |   2    |
//! |          raw limit          | duration |  rate  | limit  |
//! |                             |  class   | class  |  type  |
//! +-----------------------------+----------+--------+--------+
//! ```
//!
//! Absolute limits are fixed-point amounts. Ratio limits are basis points of a
//! reference price supplied by the caller.

use crate::numeric::{mul_div, BASIS_POINTS_SCALE};
use crate::LedgerError;
use candid::CandidType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const LIMIT_TYPE_BITS: u32 = 2;
const RATE_CLASS_BITS: u32 = 3;
const DURATION_CLASS_BITS: u32 = 3;

const RATE_CLASS_SHIFT: u32 = LIMIT_TYPE_BITS;
const DURATION_CLASS_SHIFT: u32 = RATE_CLASS_SHIFT + RATE_CLASS_BITS;
const LIMIT_SHIFT: u32 = DURATION_CLASS_SHIFT + DURATION_CLASS_BITS;

pub const MAX_CLASS: u8 = (1 << RATE_CLASS_BITS) - 1;
pub const MAX_RAW_LIMIT: u128 = u128::MAX >> LIMIT_SHIFT;

#[derive(CandidType, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitType {
    Absolute,
    Ratio,
}

impl LimitType {
    /// Ratio ticks sort ahead of absolute ticks.
    fn rank(self) -> u8 {
        match self {
            LimitType::Ratio => 0,
            LimitType::Absolute => 1,
        }
    }

    fn bits(self) -> u128 {
        match self {
            LimitType::Absolute => 0,
            LimitType::Ratio => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    pub limit: u128,
    pub duration_class: u8,
    pub rate_class: u8,
    pub limit_type: LimitType,
}

/// A tick with its limit resolved against a reference price.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedTick {
    pub limit: u128,
    pub duration_class: u8,
    pub rate_class: u8,
    pub limit_type: LimitType,
}

impl DecodedTick {
    /// Compares two decoded ticks under the ledger ordering: ratio ticks first, then by
    /// limit within each type.
    pub fn cmp_order(&self, other: &DecodedTick) -> Ordering {
        (self.limit_type.rank(), self.limit).cmp(&(other.limit_type.rank(), other.limit))
    }
}

impl Tick {
    pub fn absolute(limit: u128, duration_class: u8, rate_class: u8) -> Self {
        Self {
            limit,
            duration_class,
            rate_class,
            limit_type: LimitType::Absolute,
        }
    }

    pub fn ratio(limit_bps: u128, duration_class: u8, rate_class: u8) -> Self {
        Self {
            limit: limit_bps,
            duration_class,
            rate_class,
            limit_type: LimitType::Ratio,
        }
    }

    pub fn from_key(key: u128) -> Result<Self, LedgerError> {
        let limit_type = match key & ((1 << LIMIT_TYPE_BITS) - 1) {
            0 => LimitType::Absolute,
            1 => LimitType::Ratio,
            _ => return Err(LedgerError::InvalidTick),
        };
        Ok(Self {
            limit: key >> LIMIT_SHIFT,
            duration_class: ((key >> DURATION_CLASS_SHIFT) & MAX_CLASS as u128) as u8,
            rate_class: ((key >> RATE_CLASS_SHIFT) & MAX_CLASS as u128) as u8,
            limit_type,
        })
    }

    /// Packs the tick into its wire key.
    ///
    /// Panics if a field does not fit its bit width.
    pub fn key(&self) -> u128 {
        assert!(self.limit <= MAX_RAW_LIMIT, "tick limit out of range");
        assert!(
            self.duration_class <= MAX_CLASS && self.rate_class <= MAX_CLASS,
            "tick class out of range"
        );
        (self.limit << LIMIT_SHIFT)
            | ((self.duration_class as u128) << DURATION_CLASS_SHIFT)
            | ((self.rate_class as u128) << RATE_CLASS_SHIFT)
            | self.limit_type.bits()
    }

    pub fn decode_with(&self, reference_price: u128) -> DecodedTick {
        let limit = match self.limit_type {
            LimitType::Absolute => self.limit,
            LimitType::Ratio => mul_div(self.limit, reference_price, BASIS_POINTS_SCALE),
        };
        DecodedTick {
            limit,
            duration_class: self.duration_class,
            rate_class: self.rate_class,
            limit_type: self.limit_type,
        }
    }
}

pub fn decode(key: u128, reference_price: u128) -> Result<DecodedTick, LedgerError> {
    Ok(Tick::from_key(key)?.decode_with(reference_price))
}

/// Validates `key` as the next element of a caller-ordered tick sequence and returns its
/// decoded limit.
pub fn validate(
    key: u128,
    previous: Option<u128>,
    min_duration_class: u8,
    reference_price: u128,
) -> Result<u128, LedgerError> {
    let tick = Tick::from_key(key)?;
    if tick.limit == 0 || tick.duration_class < min_duration_class {
        return Err(LedgerError::InvalidTick);
    }
    let decoded = tick.decode_with(reference_price);
    if let Some(previous) = previous {
        let previous = decode(previous, reference_price)?;
        if decoded.cmp_order(&previous) != Ordering::Greater {
            return Err(LedgerError::InvalidTick);
        }
    }
    Ok(decoded.limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::FIXED_POINT_SCALE;
    use assert_matches::assert_matches;

    #[test]
    fn key_round_trip_preserves_fields() {
        let tick = Tick::absolute(25 * FIXED_POINT_SCALE, 4, 7);
        assert_eq!(Tick::from_key(tick.key()).unwrap(), tick);

        let tick = Tick::ratio(7_500, 1, 2);
        let key = tick.key();
        assert_eq!(key & 0b11, 1);
        assert_eq!(Tick::from_key(key).unwrap(), tick);
    }

    #[test]
    fn malformed_limit_type_is_rejected() {
        assert_matches!(Tick::from_key(0b10), Err(LedgerError::InvalidTick));
        assert_matches!(Tick::from_key(u128::MAX), Err(LedgerError::InvalidTick));
    }

    #[test]
    fn ratio_limit_scales_with_reference_price() {
        let key = Tick::ratio(5_000, 0, 0).key();
        let decoded = decode(key, 40 * FIXED_POINT_SCALE).unwrap();
        assert_eq!(decoded.limit, 20 * FIXED_POINT_SCALE);
        assert_eq!(decoded.limit_type, LimitType::Ratio);

        let key = Tick::absolute(3 * FIXED_POINT_SCALE, 0, 0).key();
        assert_eq!(decode(key, 40 * FIXED_POINT_SCALE).unwrap().limit, 3 * FIXED_POINT_SCALE);
    }

    #[test]
    fn validate_enforces_duration_and_order() {
        let price = 100 * FIXED_POINT_SCALE;
        let ratio = Tick::ratio(1_000, 2, 0).key();
        let low = Tick::absolute(10 * FIXED_POINT_SCALE, 2, 0).key();
        let high = Tick::absolute(20 * FIXED_POINT_SCALE, 2, 0).key();

        assert_eq!(validate(low, None, 2, price), Ok(10 * FIXED_POINT_SCALE));
        assert_matches!(validate(low, None, 3, price), Err(LedgerError::InvalidTick));

        // ratio ticks must come first, even when their resolved limit is larger
        assert_eq!(validate(low, Some(ratio), 0, price), Ok(10 * FIXED_POINT_SCALE));
        assert_matches!(validate(ratio, Some(low), 0, price), Err(LedgerError::InvalidTick));

        assert!(validate(high, Some(low), 0, price).is_ok());
        assert_matches!(validate(low, Some(high), 0, price), Err(LedgerError::InvalidTick));
        assert_matches!(validate(low, Some(low), 0, price), Err(LedgerError::InvalidTick));
    }

    #[test]
    fn zero_limit_is_never_valid() {
        let key = Tick::absolute(0, 1, 1).key();
        assert_matches!(validate(key, None, 0, FIXED_POINT_SCALE), Err(LedgerError::InvalidTick));
    }
}
