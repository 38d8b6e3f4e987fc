//! Currency arithmetic.
//!
//! All amounts are [`Decimal`]s with two places of precision. Ratios and
//! intermediate products keep full precision; rounding happens once, on the
//! final amount, using round-half-to-even.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::CoreError;

pub const CURRENCY_DP: u32 = 2;

/// Largest single amount accepted from a caller: 10^15.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xA4C6_8000, 0x0003_8D7E, 0, false, 0);

/// Round a final amount to currency precision (banker's rounding).
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CURRENCY_DP, RoundingStrategy::MidpointNearestEven)
}

/// `principal * rate`, rounded once at the end.
pub fn apply_rate(principal: Decimal, rate: Decimal) -> Decimal {
    round_currency(principal * rate)
}

/// Validate an amount supplied by a caller: strictly positive, at most
/// [`MAX_AMOUNT`] and no more precise than a cent.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, CoreError> {
    if amount <= Decimal::ZERO {
        return Err(CoreError::InvalidAmount(format!("{amount} must be positive")));
    }
    if amount > MAX_AMOUNT {
        return Err(CoreError::InvalidAmount(format!(
            "{amount} exceeds the maximum of {MAX_AMOUNT}"
        )));
    }
    let normalized = amount.normalize();
    if normalized.scale() > CURRENCY_DP {
        return Err(CoreError::InvalidAmount(format!(
            "{amount} has more than {CURRENCY_DP} decimal places"
        )));
    }
    Ok(normalized)
}

pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal, CoreError> {
    a.checked_add(b).ok_or_else(overflow)
}

pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal, CoreError> {
    a.checked_mul(b).ok_or_else(overflow)
}

/// Sum that reports overflow instead of panicking.
pub fn checked_sum<I>(amounts: I) -> Result<Decimal, CoreError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |total, amount| checked_add(total, amount))
}

fn overflow() -> CoreError {
    CoreError::InvalidAmount("arithmetic overflow".into())
}

pub fn parse_amount(raw: &str) -> Result<Decimal, CoreError> {
    let value = Decimal::from_str(raw.trim())
        .map_err(|e| CoreError::InvalidAmount(format!("{raw}: {e}")))?;
    validate_amount(value)
}
