use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::money;

pub const MAX_LEVELS: usize = 5;
pub const DEFAULT_LEVELS_BPS: [u32; MAX_LEVELS] = [1_000, 500, 300, 200, 100];

const BPS_DENOMINATOR: u32 = 10_000;

/// Percentage-of-principal table paid to ancestors, one entry per level.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommissionSchedule {
    levels_bps: Vec<u32>,
    minimum_payout: Decimal,
}

impl Default for CommissionSchedule {
    fn default() -> Self {
        Self {
            levels_bps: DEFAULT_LEVELS_BPS.to_vec(),
            minimum_payout: Decimal::ZERO,
        }
    }
}

impl CommissionSchedule {
    pub fn new(levels_bps: Vec<u32>, minimum_payout: Decimal) -> Result<Self, CoreError> {
        if levels_bps.is_empty() || levels_bps.len() > MAX_LEVELS {
            return Err(CoreError::InvalidSchedule(format!(
                "expected 1..={MAX_LEVELS} levels, got {}",
                levels_bps.len()
            )));
        }
        let total: u32 = levels_bps.iter().sum();
        if total >= BPS_DENOMINATOR {
            return Err(CoreError::InvalidSchedule(format!(
                "levels pay out {total} bps, must stay below {BPS_DENOMINATOR}"
            )));
        }
        if minimum_payout.is_sign_negative() {
            return Err(CoreError::InvalidSchedule(
                "minimum payout cannot be negative".into(),
            ));
        }
        Ok(Self {
            levels_bps,
            minimum_payout,
        })
    }

    /// Number of compensated levels.
    pub fn levels(&self) -> usize {
        self.levels_bps.len()
    }

    pub fn levels_bps(&self) -> &[u32] {
        &self.levels_bps
    }

    pub fn minimum_payout(&self) -> Decimal {
        self.minimum_payout
    }

    /// Rate for a 1-based level, `None` past the end of the table.
    pub fn rate(&self, level: usize) -> Option<Decimal> {
        let bps = *self.levels_bps.get(level.checked_sub(1)?)?;
        Some(Decimal::new(bps as i64, 0) / Decimal::from(BPS_DENOMINATOR))
    }

    /// Commission owed at `level` on `principal`, or `None` when the level is
    /// not paid or falls under the minimum payout.
    pub fn commission(&self, level: usize, principal: Decimal) -> Option<Decimal> {
        let rate = self.rate(level)?;
        if rate.is_zero() {
            return None;
        }
        let amount = money::apply_rate(principal, rate);
        if amount < self.minimum_payout {
            return None;
        }
        Some(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn default_schedule_decays_over_five_levels() {
        let schedule = CommissionSchedule::default();
        assert_eq!(schedule.levels(), 5);
        let rates: Vec<Decimal> = (1..=5).map(|l| schedule.rate(l).unwrap()).collect();
        assert_eq!(
            rates,
            vec![d("0.10"), d("0.05"), d("0.03"), d("0.02"), d("0.01")]
        );
        assert_eq!(schedule.rate(0), None);
        assert_eq!(schedule.rate(6), None);
    }

    #[test]
    fn commission_applies_minimum_payout() {
        let schedule = CommissionSchedule::new(vec![1_000, 0, 100], d("1.00")).unwrap();
        assert_eq!(schedule.commission(1, d("1000")), Some(d("100")));
        assert_eq!(schedule.commission(2, d("1000")), None);
        assert_eq!(schedule.commission(3, d("50")), None);
        assert_eq!(schedule.commission(3, d("100")), Some(d("1.00")));
    }

    #[test]
    fn rejects_malformed_tables() {
        assert!(CommissionSchedule::new(vec![], Decimal::ZERO).is_err());
        assert!(CommissionSchedule::new(vec![100; 6], Decimal::ZERO).is_err());
        assert!(CommissionSchedule::new(vec![9_000, 1_000], Decimal::ZERO).is_err());
        assert!(CommissionSchedule::new(vec![100], d("-1")).is_err());
    }
}
