//! SQLite ledger backend.
//!
//! One connection guarded by a mutex. Writes run in an `IMMEDIATE`
//! transaction so the write lock is taken before the first read; dropping the
//! scope without committing rolls everything back.

pub mod schema;

mod queries;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use tracing::{debug, info};

use genealogy_core::{
    CommissionTransaction, Investment, InvestmentId, LedgerEntry, PaymentProvider, Plan, User,
    UserId,
};

use crate::{LedgerRead, LedgerStore, LedgerWrite, StoreError};

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open or create the ledger database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!("Opening ledger database at {:?}", path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Internal(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("Opening in-memory ledger database");
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(StoreError::poisoned)?;
        f(&conn)
    }
}

impl LedgerRead for SqliteLedger {
    fn get_user(&self, id: &UserId) -> Result<User, StoreError> {
        self.read(|c| queries::get_user(c, id))
    }

    fn find_user_by_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        self.read(|c| queries::find_user_by_code(c, code))
    }

    fn recruits_of(&self, sponsor: &UserId) -> Result<Vec<User>, StoreError> {
        self.read(|c| queries::recruits_of(c, sponsor))
    }

    fn get_plan(&self, id: &str) -> Result<Plan, StoreError> {
        self.read(|c| queries::get_plan(c, id))
    }

    fn plans(&self) -> Result<Vec<Plan>, StoreError> {
        self.read(queries::plans)
    }

    fn get_investment(&self, id: &InvestmentId) -> Result<Investment, StoreError> {
        self.read(|c| queries::get_investment(c, id))
    }

    fn investments_of(&self, user: &UserId) -> Result<Vec<Investment>, StoreError> {
        self.read(|c| queries::investments_of(c, user))
    }

    fn due_investments(&self, now: DateTime<Utc>) -> Result<Vec<Investment>, StoreError> {
        self.read(|c| queries::due_investments(c, now))
    }

    fn has_active_investment(&self, user: &UserId) -> Result<bool, StoreError> {
        self.read(|c| queries::has_active_investment(c, user))
    }

    fn commissions_for(
        &self,
        investment: &InvestmentId,
    ) -> Result<Vec<CommissionTransaction>, StoreError> {
        self.read(|c| queries::commissions_for(c, investment))
    }

    fn commissions_earned_by(&self, user: &UserId) -> Result<Vec<CommissionTransaction>, StoreError> {
        self.read(|c| queries::commissions_earned_by(c, user))
    }

    fn entries_of(&self, user: &UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.read(|c| queries::entries_of(c, user))
    }

    fn balances(&self) -> Result<BTreeMap<UserId, Decimal>, StoreError> {
        self.read(queries::balances)
    }

    fn entry_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        self.read(|c| queries::entry_by_reference(c, provider, reference))
    }
}

impl LedgerStore for SqliteLedger {
    fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn LedgerWrite) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(StoreError::poisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut scope = SqliteTx { tx };
        let out = f(&mut scope)?;
        scope.tx.commit()?;
        Ok(out)
    }
}

/// Transaction scope handed to [`LedgerStore::transaction`] closures.
pub struct SqliteTx<'c> {
    tx: Transaction<'c>,
}

impl LedgerRead for SqliteTx<'_> {
    fn get_user(&self, id: &UserId) -> Result<User, StoreError> {
        queries::get_user(&self.tx, id)
    }

    fn find_user_by_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        queries::find_user_by_code(&self.tx, code)
    }

    fn recruits_of(&self, sponsor: &UserId) -> Result<Vec<User>, StoreError> {
        queries::recruits_of(&self.tx, sponsor)
    }

    fn get_plan(&self, id: &str) -> Result<Plan, StoreError> {
        queries::get_plan(&self.tx, id)
    }

    fn plans(&self) -> Result<Vec<Plan>, StoreError> {
        queries::plans(&self.tx)
    }

    fn get_investment(&self, id: &InvestmentId) -> Result<Investment, StoreError> {
        queries::get_investment(&self.tx, id)
    }

    fn investments_of(&self, user: &UserId) -> Result<Vec<Investment>, StoreError> {
        queries::investments_of(&self.tx, user)
    }

    fn due_investments(&self, now: DateTime<Utc>) -> Result<Vec<Investment>, StoreError> {
        queries::due_investments(&self.tx, now)
    }

    fn has_active_investment(&self, user: &UserId) -> Result<bool, StoreError> {
        queries::has_active_investment(&self.tx, user)
    }

    fn commissions_for(
        &self,
        investment: &InvestmentId,
    ) -> Result<Vec<CommissionTransaction>, StoreError> {
        queries::commissions_for(&self.tx, investment)
    }

    fn commissions_earned_by(&self, user: &UserId) -> Result<Vec<CommissionTransaction>, StoreError> {
        queries::commissions_earned_by(&self.tx, user)
    }

    fn entries_of(&self, user: &UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        queries::entries_of(&self.tx, user)
    }

    fn balances(&self) -> Result<BTreeMap<UserId, Decimal>, StoreError> {
        queries::balances(&self.tx)
    }

    fn entry_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        queries::entry_by_reference(&self.tx, provider, reference)
    }
}

impl LedgerWrite for SqliteTx<'_> {
    fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        queries::insert_user(&self.tx, user)
    }

    fn upsert_plan(&mut self, plan: &Plan) -> Result<(), StoreError> {
        queries::upsert_plan(&self.tx, plan)
    }

    fn insert_investment(&mut self, investment: &Investment) -> Result<(), StoreError> {
        queries::insert_investment(&self.tx, investment)
    }

    fn update_investment(&mut self, investment: &Investment) -> Result<(), StoreError> {
        queries::update_investment(&self.tx, investment)
    }

    fn insert_commissions(&mut self, rows: &[CommissionTransaction]) -> Result<(), StoreError> {
        queries::insert_commissions(&self.tx, rows)
    }

    fn post_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        queries::post_entry(&self.tx, entry)
    }
}
