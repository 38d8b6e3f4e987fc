//! Genealogy ledger store.
//!
//! The store persists users, plans, investments, commission rows and wallet
//! entries. Reads are available directly on a store; every mutation happens
//! inside [`LedgerStore::transaction`], which commits when the closure returns
//! `Ok` and discards all staged changes when it returns `Err`.
//!
//! Two backends are provided:
//!
//! * [`MemoryLedger`]: ordered maps behind an `RwLock`, used by tests and
//!   embedders.
//! * [`SqliteLedger`]: a single SQLite file in WAL mode.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use genealogy_core::money;
use genealogy_core::{
    CommissionTransaction, Investment, InvestmentId, LedgerEntry, PaymentProvider, Plan, User,
    UserId,
};

pub mod memory;
pub mod snapshot;
pub mod sqlite;

mod error;

pub use error::StoreError;
pub use memory::MemoryLedger;
pub use snapshot::LedgerSnapshot;
pub use sqlite::SqliteLedger;

/// Read side of the ledger, available both on a store and inside a
/// transaction scope.
pub trait LedgerRead {
    fn get_user(&self, id: &UserId) -> Result<User, StoreError>;

    fn find_user_by_code(&self, code: &str) -> Result<Option<User>, StoreError>;

    /// Direct recruits of `sponsor`, oldest registration first.
    fn recruits_of(&self, sponsor: &UserId) -> Result<Vec<User>, StoreError>;

    fn get_plan(&self, id: &str) -> Result<Plan, StoreError>;

    fn plans(&self) -> Result<Vec<Plan>, StoreError>;

    fn get_investment(&self, id: &InvestmentId) -> Result<Investment, StoreError>;

    fn investments_of(&self, user: &UserId) -> Result<Vec<Investment>, StoreError>;

    /// Active investments whose end date is at or before `now`.
    fn due_investments(&self, now: DateTime<Utc>) -> Result<Vec<Investment>, StoreError>;

    fn has_active_investment(&self, user: &UserId) -> Result<bool, StoreError>;

    fn commissions_for(
        &self,
        investment: &InvestmentId,
    ) -> Result<Vec<CommissionTransaction>, StoreError>;

    fn commissions_earned_by(&self, user: &UserId) -> Result<Vec<CommissionTransaction>, StoreError>;

    fn entries_of(&self, user: &UserId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Sum of every user's entries, keyed by user.
    fn balances(&self) -> Result<BTreeMap<UserId, Decimal>, StoreError>;

    /// The entry booked under a provider transaction id, if any.
    fn entry_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    fn has_entry_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.entry_by_reference(provider, reference)?.is_some())
    }

    fn balance(&self, user: &UserId) -> Result<Decimal, StoreError> {
        let entries = self.entries_of(user)?;
        Ok(money::checked_sum(entries.iter().map(|e| e.amount))?)
    }

    /// Ancestors of `id`, nearest first, at most `max_levels` long.
    ///
    /// The walk stops at a user without a sponsor, at a dangling sponsor
    /// pointer, or at the first repeated user.
    fn sponsor_chain(&self, id: &UserId, max_levels: usize) -> Result<Vec<User>, StoreError> {
        let origin = self.get_user(id)?;
        let mut chain = Vec::new();
        let mut visited = BTreeSet::from([origin.id]);
        let mut next = origin.sponsor_id;
        while let Some(sponsor_id) = next {
            if chain.len() >= max_levels {
                break;
            }
            if !visited.insert(sponsor_id) {
                warn!(user = %origin.id, %sponsor_id, "sponsor chain loops, truncating");
                break;
            }
            let sponsor = match self.get_user(&sponsor_id) {
                Ok(user) => user,
                Err(err) if err.is_not_found() => {
                    warn!(user = %origin.id, %sponsor_id, "sponsor pointer is dangling");
                    break;
                }
                Err(err) => return Err(err),
            };
            next = sponsor.sponsor_id;
            chain.push(sponsor);
        }
        Ok(chain)
    }
}

/// Mutations, only reachable through a transaction scope.
pub trait LedgerWrite: LedgerRead {
    /// Fails if the sponsor is unknown, points at the user itself, or the
    /// id/referral code is taken.
    fn insert_user(&mut self, user: &User) -> Result<(), StoreError>;

    fn upsert_plan(&mut self, plan: &Plan) -> Result<(), StoreError>;

    fn insert_investment(&mut self, investment: &Investment) -> Result<(), StoreError>;

    /// Persist a status change. Only status and `closed_at` are written.
    fn update_investment(&mut self, investment: &Investment) -> Result<(), StoreError>;

    /// Fails with `DuplicateCommission` when any (investment, beneficiary)
    /// pair already exists.
    fn insert_commissions(&mut self, rows: &[CommissionTransaction]) -> Result<(), StoreError>;

    fn post_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;
}

pub trait LedgerStore: LedgerRead + Send + Sync {
    /// Run `f` in one all-or-nothing transaction.
    fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn LedgerWrite) -> Result<T, StoreError>;
}
