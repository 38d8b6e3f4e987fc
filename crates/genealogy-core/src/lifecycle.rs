//! Investment state machine.
//!
//! `active` is the only non-terminal state. It moves to `completed` once the
//! end date has passed, or to `terminated` by an administrative action.

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{Investment, InvestmentStatus, Plan, UserId};
use crate::money;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Principal is refunded, returns are forfeited.
    EarlyWithdrawal,
    /// Principal and returns are forfeited.
    Violation,
}

impl TerminationReason {
    pub fn refunds_principal(&self) -> bool {
        matches!(self, TerminationReason::EarlyWithdrawal)
    }
}

impl InvestmentStatus {
    pub fn can_transition_to(&self, next: InvestmentStatus) -> bool {
        matches!(
            (self, next),
            (InvestmentStatus::Active, InvestmentStatus::Completed)
                | (InvestmentStatus::Active, InvestmentStatus::Terminated)
        )
    }
}

impl Investment {
    /// Open a new active investment in `plan` starting at `start`.
    pub fn open(
        user_id: UserId,
        plan: &Plan,
        amount: Decimal,
        start: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let end_date = start
            .checked_add_months(Months::new(plan.duration_months))
            .ok_or_else(|| CoreError::DateOutOfRange(plan.id.clone()))?;
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id: plan.id.clone(),
            amount,
            start_date: start,
            end_date,
            status: InvestmentStatus::Active,
            closed_at: None,
        })
    }

    pub fn is_matured(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_date
    }

    fn transition(&mut self, next: InvestmentStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidState {
                id: self.id.to_string(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.closed_at = Some(now);
        Ok(())
    }

    /// Mark the investment completed. Fails before the end date and from any
    /// terminal state.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status == InvestmentStatus::Active && !self.is_matured(now) {
            return Err(CoreError::InvalidState {
                id: self.id.to_string(),
                from: self.status,
                to: InvestmentStatus::Completed,
            });
        }
        self.transition(InvestmentStatus::Completed, now)
    }

    pub fn terminate(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(InvestmentStatus::Terminated, now)
    }

    /// Total return over the full plan duration.
    pub fn projected_return(&self, plan: &Plan) -> Result<Decimal, CoreError> {
        let per_month = money::checked_mul(self.amount, plan.monthly_rate)?;
        let total = money::checked_mul(per_month, Decimal::from(plan.duration_months))?;
        Ok(money::round_currency(total))
    }

    /// Principal plus return, credited on completion.
    pub fn payout_at_maturity(&self, plan: &Plan) -> Result<Decimal, CoreError> {
        money::checked_add(self.amount, self.projected_return(plan)?)
    }
}
