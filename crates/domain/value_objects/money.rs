use anyhow::{Result, anyhow};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};

/// Number of minor units per major unit. Amounts are persisted as minor units.
const MINOR_SCALE: u32 = 2;

pub fn from_minor(amount_minor: i64) -> Decimal {
    Decimal::new(amount_minor, MINOR_SCALE)
}

pub fn to_minor(amount: Decimal) -> Result<i64> {
    round_money(amount)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| anyhow!("amount {amount} is out of range"))
}

/// Half-up to cents, the convention used for VAT and commission lines.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MINOR_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Percentages are persisted in basis points (15% == 1500).
pub fn percentage_to_basis_points(percentage: Decimal) -> Result<i32> {
    (percentage * Decimal::ONE_HUNDRED)
        .round()
        .to_i32()
        .ok_or_else(|| anyhow!("percentage {percentage} is out of range"))
}

pub fn basis_points_to_percentage(basis_points: i32) -> Decimal {
    Decimal::new(basis_points.into(), 2)
}

pub fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}
