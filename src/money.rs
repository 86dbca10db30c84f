//! Money Module
//!
//! Integer nanoTON amounts. All ledger arithmetic goes through [`Money`],
//! which never wraps: every operation that could overflow is checked and
//! reported as [`MoneyError::Overflow`].
//!
//! ## Internal Representation
//! - Amounts are `u64` nanoTON (1 TON = 10^9 nano)
//! - Balances are `i64` because contra accounts may go negative
//! - Amounts must fit in `i64` so they can be stored in `BIGINT` columns
//!
//! ## Usage
//! ```rust
//! use escrow_ledger::money::{Money, parse_ton, format_ton};
//!
//! let amount = parse_ton("1.5").unwrap();
//! assert_eq!(amount, Money::from_nano(1_500_000_000));
//! assert_eq!(format_ton(amount.nano(), 2), "1.50");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// TON has 9 decimal places
pub const TON_DECIMALS: u32 = 9;

/// nanoTON per TON
pub const NANOS_PER_TON: u64 = 1_000_000_000;

/// Basis points denominator (100% = 10_000 bp)
pub const BASIS_POINTS: u64 = 10_000;

// ============================================================================
// Error Types
// ============================================================================

/// Money arithmetic and conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Commission rate {0}bp exceeds 10000bp")]
    InvalidRate(u32),
}

// ============================================================================
// Money
// ============================================================================

/// A non-negative nanoTON amount
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Largest amount that still fits a signed 64-bit column
    pub const MAX: Money = Money(i64::MAX as u64);

    #[inline]
    pub const fn from_nano(nano: u64) -> Self {
        Self(nano)
    }

    #[inline]
    pub const fn nano(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Result<Money, MoneyError> {
        self.0
            .checked_add(other.0)
            .filter(|v| *v <= Money::MAX.0)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(self, other: Money) -> Result<Money, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or(MoneyError::InvalidAmount)
    }

    /// Signed representation for balance deltas and `BIGINT` storage
    pub fn to_i64(self) -> Result<i64, MoneyError> {
        i64::try_from(self.0).map_err(|_| MoneyError::Overflow)
    }

    /// Convert a stored non-negative `BIGINT` back into an amount
    pub fn from_i64(value: i64) -> Result<Money, MoneyError> {
        u64::try_from(value)
            .map(Money)
            .map_err(|_| MoneyError::InvalidAmount)
    }

    /// Sum a sequence of amounts, rejecting overflow
    pub fn checked_sum<I: IntoIterator<Item = Money>>(iter: I) -> Result<Money, MoneyError> {
        iter.into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Money {
    fn from(nano: u64) -> Self {
        Money(nano)
    }
}

/// Result of splitting a deal amount into owner payout and platform commission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub commission: Money,
    pub owner: Money,
}

/// Split `amount` by a commission rate in basis points
///
/// `commission = floor(amount * rate_bp / 10000)`, `owner = amount - commission`.
/// The multiplication is done in `u128` so no intermediate overflow is possible.
pub fn split_commission(amount: Money, rate_bp: u32) -> Result<CommissionSplit, MoneyError> {
    if u64::from(rate_bp) > BASIS_POINTS {
        return Err(MoneyError::InvalidRate(rate_bp));
    }

    let commission = (u128::from(amount.nano()) * u128::from(rate_bp)) / u128::from(BASIS_POINTS);
    // commission <= amount, so this always fits
    let commission = Money(u64::try_from(commission).map_err(|_| MoneyError::Overflow)?);
    let owner = amount.checked_sub(commission)?;

    Ok(CommissionSplit { commission, owner })
}

// ============================================================================
// Parse: Client → Internal (String → nanoTON)
// ============================================================================

/// Convert a TON string ("1.5") to nanoTON
///
/// Strict: rejects signs, missing leading/trailing digits, more than 9
/// fractional digits, zero and anything that does not fit [`Money::MAX`].
pub fn parse_ton(amount_str: &str) -> Result<Money, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let (whole, frac) = match amount_str.split_once('.') {
        None => (amount_str, ""),
        Some((whole, frac)) => {
            if whole.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if frac.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            if frac.contains('.') {
                return Err(MoneyError::InvalidFormat("multiple decimal points".into()));
            }
            (whole, frac)
        }
    };

    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    if frac.len() > TON_DECIMALS as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: TON_DECIMALS,
        });
    }

    let whole_num: u64 = whole.parse().map_err(|_| MoneyError::Overflow)?;
    let frac_num: u64 = if frac.is_empty() {
        0
    } else {
        format!("{:0<width$}", frac, width = TON_DECIMALS as usize)
            .parse()
            .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?
    };

    let nano = whole_num
        .checked_mul(NANOS_PER_TON)
        .and_then(|v| v.checked_add(frac_num))
        .filter(|v| *v <= Money::MAX.nano())
        .ok_or(MoneyError::Overflow)?;

    if nano == 0 {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(Money(nano))
}

// ============================================================================
// Format: Internal → Client (nanoTON → String)
// ============================================================================

/// Format a signed nanoTON value, truncating to `display_decimals`
pub fn format_ton(value: impl Into<i128>, display_decimals: u32) -> String {
    let value: i128 = value.into();
    let abs = value.unsigned_abs();
    let whole = abs / u128::from(NANOS_PER_TON);
    let frac = abs % u128::from(NANOS_PER_TON);
    let sign = if value < 0 { "-" } else { "" };

    let display = display_decimals.min(TON_DECIMALS) as usize;
    if display == 0 {
        return format!("{}{}", sign, whole);
    }

    let frac_str = format!("{:09}", frac);
    format!("{}{}.{}", sign, whole, &frac_str[..display])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_add_rejects_overflow() {
        let a = Money::MAX;
        assert_eq!(a.checked_add(Money::from_nano(1)), Err(MoneyError::Overflow));
        assert_eq!(
            Money::from_nano(2).checked_add(Money::from_nano(3)),
            Ok(Money::from_nano(5))
        );
    }

    #[test]
    fn test_checked_sum() {
        let total = Money::checked_sum([1u64, 2, 3].map(Money::from_nano)).unwrap();
        assert_eq!(total.nano(), 6);
        assert!(Money::checked_sum([Money::MAX, Money::from_nano(1)]).is_err());
    }

    #[test]
    fn test_split_commission_five_percent() {
        let split = split_commission(Money::from_nano(1_000_000_000), 500).unwrap();
        assert_eq!(split.commission.nano(), 50_000_000);
        assert_eq!(split.owner.nano(), 950_000_000);
    }

    #[test]
    fn test_split_commission_floors() {
        // 333 * 333 / 10000 = 11.0889 -> 11
        let split = split_commission(Money::from_nano(333), 333).unwrap();
        assert_eq!(split.commission.nano(), 11);
        assert_eq!(split.owner.nano(), 322);
    }

    #[test]
    fn test_split_commission_bounds() {
        let all = split_commission(Money::from_nano(77), 10_000).unwrap();
        assert_eq!(all.commission.nano(), 77);
        assert!(all.owner.is_zero());

        let none = split_commission(Money::from_nano(77), 0).unwrap();
        assert!(none.commission.is_zero());

        assert_eq!(
            split_commission(Money::from_nano(1), 10_001),
            Err(MoneyError::InvalidRate(10_001))
        );

        // No intermediate overflow on the largest storable amount
        let big = split_commission(Money::MAX, 9_999).unwrap();
        assert_eq!(
            big.commission.checked_add(big.owner).unwrap(),
            Money::MAX
        );
    }

    #[test]
    fn test_i64_conversions() {
        assert_eq!(Money::from_nano(5).to_i64().unwrap(), 5);
        assert!(Money::from_nano(u64::MAX).to_i64().is_err());
        assert!(Money::from_i64(-1).is_err());
    }

    #[test]
    fn qa_parse_ton_variations() {
        assert_eq!(parse_ton("1").unwrap().nano(), 1_000_000_000);
        assert_eq!(parse_ton("1.5").unwrap().nano(), 1_500_000_000);
        assert_eq!(parse_ton("0.000000001").unwrap().nano(), 1);
        assert_eq!(parse_ton("001.250").unwrap().nano(), 1_250_000_000);
        assert!(parse_ton("0").is_err());
        assert!(parse_ton("0.0").is_err());
    }

    #[test]
    fn qa_parse_ton_invalid_formats() {
        for case in ["1,000.00", "1.2.3", "1. 23", "+1.23", "-1", "1e2", ".", ".5", "5.", ""] {
            assert!(parse_ton(case).is_err(), "Should reject invalid format: {case:?}");
        }
    }

    #[test]
    fn qa_parse_ton_precision_and_overflow() {
        assert!(matches!(
            parse_ton("1.0000000001"),
            Err(MoneyError::PrecisionOverflow { provided: 10, max: 9 })
        ));
        // i64::MAX nano = 9223372036.854775807 TON
        assert_eq!(parse_ton("9223372036.854775807").unwrap(), Money::MAX);
        assert_eq!(parse_ton("9223372036.854775808"), Err(MoneyError::Overflow));
    }

    #[test]
    fn qa_format_ton_truncation() {
        assert_eq!(format_ton(1_999_000_000i64, 2), "1.99");
        assert_eq!(format_ton(1_999_000_000i64, 0), "1");
        assert_eq!(format_ton(1_999_000_000i64, 9), "1.999000000");
        assert_eq!(format_ton(-1i64, 9), "-0.000000001");
        assert_eq!(format_ton(Money::MAX.nano(), 3), "9223372036.854");
    }
}
