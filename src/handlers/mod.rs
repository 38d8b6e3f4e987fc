use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use genealogy_core::lifecycle::TerminationReason;
use genealogy_core::model::generate_referral_code;
use genealogy_core::money::{self, validate_amount};
use genealogy_core::{
    CommissionSchedule, CommissionTransaction, CoreError, EntryKind, Investment, InvestmentId,
    InvestmentStatus, LedgerEntry, PaymentProvider, Plan, TreeNode, User, UserId,
};
use ledger_store::{LedgerRead, LedgerStore, LedgerWrite, StoreError};
use referral_module::{build_tree, distribute_commissions, TeamStats};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Purchase {
    pub investment: Investment,
    pub commissions: Vec<CommissionTransaction>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DepositOutcome {
    Credited { entry: LedgerEntry },
    /// The provider reference was booked earlier.
    AlreadyBooked,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub investment: Investment,
    pub payout: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Termination {
    pub investment: Investment,
    pub reason: TerminationReason,
    pub refund: Option<Decimal>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dashboard {
    pub user: User,
    pub balance: Decimal,
    pub active_investments: Vec<Investment>,
    /// Active investments past their end date that no sweep has settled yet.
    pub awaiting_settlement: Vec<InvestmentId>,
    /// Sum of full-term returns on active investments.
    pub projected_returns: Decimal,
    pub commissions_earned: Decimal,
    pub team: TeamStats,
}

/// Payment and investment entry points over a ledger store. The acting user
/// is always passed in explicitly.
pub struct Platform<S> {
    store: S,
    schedule: CommissionSchedule,
    tree_depth: u32,
}

impl<S: LedgerStore> Platform<S> {
    pub fn new(store: S, schedule: CommissionSchedule, tree_depth: u32) -> Self {
        Self {
            store,
            schedule,
            tree_depth,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn schedule(&self) -> &CommissionSchedule {
        &self.schedule
    }

    pub fn install_plans(&self, plans: &[Plan]) -> Result<(), StoreError> {
        self.store
            .transaction(|tx| plans.iter().try_for_each(|plan| tx.upsert_plan(plan)))?;
        debug!(count = plans.len(), "plans installed");
        Ok(())
    }

    pub fn register_user(
        &self,
        display_name: &str,
        sponsor_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let user = self.store.transaction(|tx| {
            let sponsor_id = match sponsor_code {
                Some(code) => {
                    let sponsor = tx
                        .find_user_by_code(code)?
                        .ok_or_else(|| CoreError::not_found("referral code", code))?;
                    Some(sponsor.id)
                }
                None => None,
            };
            let mut user = User::new(display_name, sponsor_id, now);
            while tx.find_user_by_code(&user.referral_code)?.is_some() {
                user.referral_code = generate_referral_code(&mut rand::thread_rng());
            }
            tx.insert_user(&user)?;
            Ok(user)
        })?;
        info!(user = %user.id, code = %user.referral_code, sponsor = ?user.sponsor_id, "user registered");
        Ok(user)
    }

    /// Credit a deposit confirmed by `provider`. Provider webhooks are
    /// retried, so a reference already booked for the same user is a no-op.
    /// The same reference arriving for a different user is rejected.
    ///
    /// Only the wallet moves here; commissions are paid on purchase.
    pub fn on_deposit_confirmed(
        &self,
        user_id: &UserId,
        amount: Decimal,
        provider: PaymentProvider,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<DepositOutcome, StoreError> {
        let amount = validate_amount(amount)?;
        let outcome = self.store.transaction(|tx| {
            let user = tx.get_user(user_id)?;
            if let Some(booked) = tx.entry_by_reference(provider, reference)? {
                if booked.user_id != user.id {
                    warn!(
                        user = %user.id,
                        booked_for = %booked.user_id,
                        %provider,
                        reference,
                        "deposit reference already booked for another user"
                    );
                    return Err(CoreError::ReferenceConflict {
                        provider: provider.to_string(),
                        reference: reference.to_string(),
                    }
                    .into());
                }
                return Ok(DepositOutcome::AlreadyBooked);
            }
            let entry = LedgerEntry::credit(
                user.id,
                EntryKind::Deposit,
                amount,
                Some(reference.to_string()),
                now,
            )
            .with_provider(provider);
            tx.post_entry(&entry)?;
            Ok(DepositOutcome::Credited { entry })
        })?;
        match &outcome {
            DepositOutcome::Credited { entry } => {
                info!(user = %user_id, %amount, %provider, reference, entry = %entry.id, "deposit credited")
            }
            DepositOutcome::AlreadyBooked => {
                debug!(user = %user_id, %provider, reference, "deposit already booked")
            }
        }
        Ok(outcome)
    }

    /// Buy into `plan_id` from the wallet. The investment, the wallet debit
    /// and every commission row commit together or not at all.
    pub fn on_investment_purchased(
        &self,
        user_id: &UserId,
        plan_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Purchase, StoreError> {
        let amount = validate_amount(amount)?;
        let purchase = self.store.transaction(|tx| {
            let user = tx.get_user(user_id)?;
            let plan = tx.get_plan(plan_id)?;
            if !plan.accepts(amount) {
                return Err(CoreError::AmountOutOfPlanBounds {
                    plan: plan.id,
                    amount,
                }
                .into());
            }
            ensure_funds(tx, &user, amount)?;

            let investment = Investment::open(user.id, &plan, amount, now)?;
            tx.insert_investment(&investment)?;
            tx.post_entry(&LedgerEntry::debit(
                user.id,
                EntryKind::Investment,
                amount,
                Some(format!("investment:{}", investment.id)),
                now,
            ))?;
            let commissions = distribute_commissions(tx, &self.schedule, &investment, now)?;
            Ok(Purchase {
                investment,
                commissions,
            })
        })?;
        info!(
            user = %user_id,
            plan = plan_id,
            %amount,
            investment = %purchase.investment.id,
            commissions = purchase.commissions.len(),
            "investment purchased"
        );
        Ok(purchase)
    }

    pub fn request_withdrawal(
        &self,
        user_id: &UserId,
        amount: Decimal,
        provider: PaymentProvider,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let amount = validate_amount(amount)?;
        let entry = self.store.transaction(|tx| {
            let user = tx.get_user(user_id)?;
            ensure_funds(tx, &user, amount)?;
            let entry = LedgerEntry::debit(user.id, EntryKind::Withdrawal, amount, None, now)
                .with_provider(provider);
            tx.post_entry(&entry)?;
            Ok(entry)
        })?;
        info!(user = %user_id, %amount, %provider, "withdrawal requested");
        Ok(entry)
    }

    /// Complete every active investment whose end date has passed and credit
    /// principal plus return. Each investment settles in its own
    /// transaction; one that breaks a domain rule stays active and is
    /// skipped so it cannot hold up the rest.
    pub fn settle_matured(&self, now: DateTime<Utc>) -> Result<Vec<Settlement>, StoreError> {
        let due = self.store.due_investments(now)?;
        let mut settled = Vec::with_capacity(due.len());
        for investment in due {
            match self.settle_one(&investment.id, now) {
                Ok(Some(settlement)) => settled.push(settlement),
                Ok(None) => {}
                Err(err) if err.domain().is_some() => {
                    warn!(investment = %investment.id, error = %err, "settlement skipped");
                }
                Err(err) => return Err(err),
            }
        }
        if !settled.is_empty() {
            let total = money::checked_sum(settled.iter().map(|s| s.payout)).ok();
            info!(count = settled.len(), total = ?total, "matured investments settled");
        }
        Ok(settled)
    }

    fn settle_one(
        &self,
        id: &InvestmentId,
        now: DateTime<Utc>,
    ) -> Result<Option<Settlement>, StoreError> {
        self.store.transaction(|tx| {
            let mut investment = tx.get_investment(id)?;
            // closed between the sweep query and this transaction
            if investment.status != InvestmentStatus::Active {
                debug!(investment = %id, status = %investment.status, "skipping settlement");
                return Ok(None);
            }
            let plan = tx.get_plan(&investment.plan_id)?;
            let payout = investment.payout_at_maturity(&plan)?;
            investment.complete(now)?;
            tx.update_investment(&investment)?;
            tx.post_entry(&LedgerEntry::credit(
                investment.user_id,
                EntryKind::Return,
                payout,
                Some(format!("investment:{}", investment.id)),
                now,
            ))?;
            Ok(Some(Settlement { investment, payout }))
        })
    }

    pub fn terminate_investment(
        &self,
        id: &InvestmentId,
        reason: TerminationReason,
        now: DateTime<Utc>,
    ) -> Result<Termination, StoreError> {
        let termination = self.store.transaction(|tx| {
            let mut investment = tx.get_investment(id)?;
            investment.terminate(now)?;
            tx.update_investment(&investment)?;
            let refund = if reason.refunds_principal() {
                tx.post_entry(&LedgerEntry::credit(
                    investment.user_id,
                    EntryKind::Refund,
                    investment.amount,
                    Some(format!("investment:{}", investment.id)),
                    now,
                ))?;
                Some(investment.amount)
            } else {
                None
            };
            Ok(Termination {
                investment,
                reason,
                refund,
            })
        })?;
        info!(investment = %id, ?reason, refund = ?termination.refund, "investment terminated");
        Ok(termination)
    }

    /// Downline of `user_id`, `depth` levels deep (configured default when
    /// `None`).
    pub fn genealogy(&self, user_id: &UserId, depth: Option<u32>) -> Result<TreeNode, StoreError> {
        build_tree(&self.store, user_id, depth.unwrap_or(self.tree_depth))
    }

    pub fn dashboard(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Dashboard, StoreError> {
        let user = self.store.get_user(user_id)?;
        let balance = self.store.balance(user_id)?;

        let mut active_investments = Vec::new();
        let mut awaiting_settlement = Vec::new();
        let mut projected_returns = Decimal::ZERO;
        for investment in self.store.investments_of(user_id)? {
            if investment.status != InvestmentStatus::Active {
                continue;
            }
            let plan = self.store.get_plan(&investment.plan_id)?;
            projected_returns =
                money::checked_add(projected_returns, investment.projected_return(&plan)?)?;
            if investment.is_matured(now) {
                awaiting_settlement.push(investment.id);
            }
            active_investments.push(investment);
        }

        let commissions = self.store.commissions_earned_by(user_id)?;
        let commissions_earned = money::checked_sum(commissions.iter().map(|c| c.amount))?;
        let team = TeamStats::from_tree(&self.genealogy(user_id, None)?);
        debug!(
            user = %user_id,
            members = team.total_members,
            awaiting = awaiting_settlement.len(),
            "dashboard built"
        );

        Ok(Dashboard {
            user,
            balance,
            active_investments,
            awaiting_settlement,
            projected_returns,
            commissions_earned,
            team,
        })
    }
}

fn ensure_funds(tx: &dyn LedgerWrite, user: &User, amount: Decimal) -> Result<(), StoreError> {
    let available = tx.balance(&user.id)?;
    if available < amount {
        return Err(CoreError::InsufficientFunds {
            user: user.id.to_string(),
            available,
            requested: amount,
        }
        .into());
    }
    Ok(())
}
