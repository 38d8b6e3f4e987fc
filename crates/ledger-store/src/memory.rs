use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use genealogy_core::money;
use genealogy_core::{
    CommissionTransaction, CoreError, Investment, InvestmentId, InvestmentStatus, LedgerEntry,
    PaymentProvider, Plan, PlanId, User, UserId,
};

use crate::{LedgerRead, LedgerStore, LedgerWrite, StoreError};

/// Whole ledger held in ordered maps. Cloned to stage a transaction.
#[derive(Clone, Debug, Default)]
pub struct LedgerState {
    users: BTreeMap<UserId, User>,
    plans: BTreeMap<PlanId, Plan>,
    investments: BTreeMap<InvestmentId, Investment>,
    commissions: Vec<CommissionTransaction>,
    entries: Vec<LedgerEntry>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerRead for LedgerState {
    fn get_user(&self, id: &UserId) -> Result<User, StoreError> {
        self.users
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("user", id).into())
    }

    fn find_user_by_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .values()
            .find(|u| u.referral_code == code)
            .cloned())
    }

    fn recruits_of(&self, sponsor: &UserId) -> Result<Vec<User>, StoreError> {
        let mut recruits: Vec<User> = self
            .users
            .values()
            .filter(|u| u.sponsor_id.as_ref() == Some(sponsor))
            .cloned()
            .collect();
        recruits.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(recruits)
    }

    fn get_plan(&self, id: &str) -> Result<Plan, StoreError> {
        self.plans
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("plan", id).into())
    }

    fn plans(&self) -> Result<Vec<Plan>, StoreError> {
        Ok(self.plans.values().cloned().collect())
    }

    fn get_investment(&self, id: &InvestmentId) -> Result<Investment, StoreError> {
        self.investments
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("investment", id).into())
    }

    fn investments_of(&self, user: &UserId) -> Result<Vec<Investment>, StoreError> {
        let mut out: Vec<Investment> = self
            .investments
            .values()
            .filter(|i| &i.user_id == user)
            .cloned()
            .collect();
        out.sort_by_key(|i| i.start_date);
        Ok(out)
    }

    fn due_investments(&self, now: DateTime<Utc>) -> Result<Vec<Investment>, StoreError> {
        let mut out: Vec<Investment> = self
            .investments
            .values()
            .filter(|i| i.status == InvestmentStatus::Active && i.end_date <= now)
            .cloned()
            .collect();
        out.sort_by_key(|i| i.end_date);
        Ok(out)
    }

    fn has_active_investment(&self, user: &UserId) -> Result<bool, StoreError> {
        Ok(self
            .investments
            .values()
            .any(|i| &i.user_id == user && i.status == InvestmentStatus::Active))
    }

    fn commissions_for(
        &self,
        investment: &InvestmentId,
    ) -> Result<Vec<CommissionTransaction>, StoreError> {
        Ok(self
            .commissions
            .iter()
            .filter(|c| &c.investment_id == investment)
            .cloned()
            .collect())
    }

    fn commissions_earned_by(&self, user: &UserId) -> Result<Vec<CommissionTransaction>, StoreError> {
        Ok(self
            .commissions
            .iter()
            .filter(|c| &c.beneficiary_id == user)
            .cloned()
            .collect())
    }

    fn entries_of(&self, user: &UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| &e.user_id == user)
            .cloned()
            .collect())
    }

    fn balances(&self) -> Result<BTreeMap<UserId, Decimal>, StoreError> {
        let mut out: BTreeMap<UserId, Decimal> =
            self.users.keys().map(|id| (*id, Decimal::ZERO)).collect();
        for entry in &self.entries {
            let balance = out.entry(entry.user_id).or_insert(Decimal::ZERO);
            *balance = money::checked_add(*balance, entry.amount)?;
        }
        Ok(out)
    }

    fn entry_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.provider == Some(provider) && e.reference.as_deref() == Some(reference))
            .cloned())
    }
}

impl LedgerWrite for LedgerState {
    fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        if let Some(sponsor) = &user.sponsor_id {
            if sponsor == &user.id {
                return Err(CoreError::SponsorCycle(user.id.to_string()).into());
            }
            if !self.users.contains_key(sponsor) {
                return Err(CoreError::not_found("sponsor", sponsor).into());
            }
        }
        if self.users.contains_key(&user.id) {
            return Err(StoreError::Internal(format!("user {} already exists", user.id)));
        }
        if self.find_user_by_code(&user.referral_code)?.is_some() {
            return Err(StoreError::Internal(format!(
                "referral code {} already taken",
                user.referral_code
            )));
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    fn upsert_plan(&mut self, plan: &Plan) -> Result<(), StoreError> {
        self.plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    fn insert_investment(&mut self, investment: &Investment) -> Result<(), StoreError> {
        self.get_user(&investment.user_id)?;
        self.get_plan(&investment.plan_id)?;
        if self.investments.contains_key(&investment.id) {
            return Err(StoreError::Internal(format!(
                "investment {} already exists",
                investment.id
            )));
        }
        self.investments.insert(investment.id, investment.clone());
        Ok(())
    }

    fn update_investment(&mut self, investment: &Investment) -> Result<(), StoreError> {
        let stored = self
            .investments
            .get_mut(&investment.id)
            .ok_or_else(|| CoreError::not_found("investment", investment.id))?;
        stored.status = investment.status;
        stored.closed_at = investment.closed_at;
        Ok(())
    }

    fn insert_commissions(&mut self, rows: &[CommissionTransaction]) -> Result<(), StoreError> {
        for row in rows {
            let duplicate = self.commissions.iter().any(|c| {
                c.investment_id == row.investment_id && c.beneficiary_id == row.beneficiary_id
            });
            if duplicate {
                return Err(CoreError::DuplicateCommission(row.investment_id.to_string()).into());
            }
            self.commissions.push(row.clone());
        }
        Ok(())
    }

    fn post_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        if let (Some(provider), Some(reference)) = (entry.provider, entry.reference.as_deref()) {
            if self.has_entry_reference(provider, reference)? {
                return Err(StoreError::Internal(format!(
                    "{provider} reference {reference} already booked"
                )));
            }
        }
        self.entries.push(entry.clone());
        Ok(())
    }
}

/// In-process store. Transactions stage their writes on a copy of the state
/// and swap it in only when the closure succeeds.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        f(&state)
    }
}

impl LedgerRead for MemoryLedger {
    fn get_user(&self, id: &UserId) -> Result<User, StoreError> {
        self.read(|s| s.get_user(id))
    }

    fn find_user_by_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        self.read(|s| s.find_user_by_code(code))
    }

    fn recruits_of(&self, sponsor: &UserId) -> Result<Vec<User>, StoreError> {
        self.read(|s| s.recruits_of(sponsor))
    }

    fn get_plan(&self, id: &str) -> Result<Plan, StoreError> {
        self.read(|s| s.get_plan(id))
    }

    fn plans(&self) -> Result<Vec<Plan>, StoreError> {
        self.read(|s| s.plans())
    }

    fn get_investment(&self, id: &InvestmentId) -> Result<Investment, StoreError> {
        self.read(|s| s.get_investment(id))
    }

    fn investments_of(&self, user: &UserId) -> Result<Vec<Investment>, StoreError> {
        self.read(|s| s.investments_of(user))
    }

    fn due_investments(&self, now: DateTime<Utc>) -> Result<Vec<Investment>, StoreError> {
        self.read(|s| s.due_investments(now))
    }

    fn has_active_investment(&self, user: &UserId) -> Result<bool, StoreError> {
        self.read(|s| s.has_active_investment(user))
    }

    fn commissions_for(
        &self,
        investment: &InvestmentId,
    ) -> Result<Vec<CommissionTransaction>, StoreError> {
        self.read(|s| s.commissions_for(investment))
    }

    fn commissions_earned_by(&self, user: &UserId) -> Result<Vec<CommissionTransaction>, StoreError> {
        self.read(|s| s.commissions_earned_by(user))
    }

    fn entries_of(&self, user: &UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.read(|s| s.entries_of(user))
    }

    fn balances(&self) -> Result<BTreeMap<UserId, Decimal>, StoreError> {
        self.read(|s| s.balances())
    }

    fn entry_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        self.read(|s| s.entry_by_reference(provider, reference))
    }
}

impl LedgerStore for MemoryLedger {
    fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn LedgerWrite) -> Result<T, StoreError>,
    {
        let mut state = self.state.write().map_err(StoreError::poisoned)?;
        let mut staged = state.clone();
        let out = f(&mut staged)?;
        *state = staged;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use genealogy_core::EntryKind;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn user(name: &str, sponsor: Option<&User>, offset_secs: i64) -> User {
        User::new(name, sponsor.map(|s| s.id), t0() + Duration::seconds(offset_secs))
    }

    #[test]
    fn failed_transaction_leaves_state_untouched() {
        let ledger = MemoryLedger::new();
        let alice = user("alice", None, 0);
        let result: Result<(), StoreError> = ledger.transaction(|tx| {
            tx.insert_user(&alice)?;
            tx.post_entry(&LedgerEntry::credit(
                alice.id,
                EntryKind::Deposit,
                Decimal::new(100, 0),
                None,
                t0(),
            ))?;
            Err(StoreError::Internal("abort".into()))
        });
        assert!(result.is_err());
        assert!(ledger.get_user(&alice.id).unwrap_err().is_not_found());
        assert!(ledger.balances().unwrap().is_empty());
    }

    #[test]
    fn recruits_are_ordered_by_registration() {
        let ledger = MemoryLedger::new();
        let root = user("root", None, 0);
        let late = user("late", Some(&root), 20);
        let early = user("early", Some(&root), 10);
        ledger
            .transaction(|tx| {
                tx.insert_user(&root)?;
                tx.insert_user(&late)?;
                tx.insert_user(&early)
            })
            .unwrap();
        let names: Vec<String> = ledger
            .recruits_of(&root.id)
            .unwrap()
            .into_iter()
            .map(|u| u.display_name)
            .collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[test]
    fn sponsor_chain_is_nearest_first_and_bounded() {
        let ledger = MemoryLedger::new();
        let mut users = vec![user("u0", None, 0)];
        for i in 1..8 {
            let next = user(&format!("u{i}"), users.last(), i);
            users.push(next);
        }
        ledger
            .transaction(|tx| users.iter().try_for_each(|u| tx.insert_user(u)))
            .unwrap();

        let chain = ledger.sponsor_chain(&users[7].id, 5).unwrap();
        let names: Vec<&str> = chain.iter().map(|u| u.display_name.as_str()).collect();
        assert_eq!(names, vec!["u6", "u5", "u4", "u3", "u2"]);
        assert!(ledger.sponsor_chain(&users[0].id, 5).unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_or_self_sponsor() {
        let ledger = MemoryLedger::new();
        let ghost = user("ghost", None, 0);
        let orphan = user("orphan", Some(&ghost), 1);
        let err = ledger.transaction(|tx| tx.insert_user(&orphan)).unwrap_err();
        assert!(err.is_not_found());

        let mut selfish = user("selfish", None, 2);
        selfish.sponsor_id = Some(selfish.id);
        let err = ledger.transaction(|tx| tx.insert_user(&selfish)).unwrap_err();
        assert!(matches!(err.domain(), Some(CoreError::SponsorCycle(_))));
    }

    #[test]
    fn provider_references_are_unique() {
        let ledger = MemoryLedger::new();
        let alice = user("alice", None, 0);
        let deposit = || {
            LedgerEntry::credit(
                alice.id,
                EntryKind::Deposit,
                Decimal::new(50, 0),
                Some("PP-1".into()),
                t0(),
            )
            .with_provider(PaymentProvider::Paypal)
        };
        ledger
            .transaction(|tx| {
                tx.insert_user(&alice)?;
                tx.post_entry(&deposit())
            })
            .unwrap();
        assert!(ledger.has_entry_reference(PaymentProvider::Paypal, "PP-1").unwrap());
        assert!(!ledger.has_entry_reference(PaymentProvider::Pesapal, "PP-1").unwrap());
        let booked = ledger
            .entry_by_reference(PaymentProvider::Paypal, "PP-1")
            .unwrap()
            .unwrap();
        assert_eq!(booked.user_id, alice.id);
        assert!(ledger.transaction(|tx| tx.post_entry(&deposit())).is_err());
        assert_eq!(ledger.balance(&alice.id).unwrap(), Decimal::new(50, 0));
    }

    #[test]
    fn overflowing_balance_is_an_error() {
        let ledger = MemoryLedger::new();
        let whale = user("whale", None, 0);
        let huge: Decimal = "50000000000000000000000000000".parse().unwrap();
        ledger
            .transaction(|tx| {
                tx.insert_user(&whale)?;
                for _ in 0..2 {
                    tx.post_entry(&LedgerEntry::credit(
                        whale.id,
                        EntryKind::Deposit,
                        huge,
                        None,
                        t0(),
                    ))?;
                }
                Ok(())
            })
            .unwrap();
        let err = ledger.balance(&whale.id).unwrap_err();
        assert!(matches!(err.domain(), Some(CoreError::InvalidAmount(_))));
        assert!(ledger.balances().is_err());
    }
}
