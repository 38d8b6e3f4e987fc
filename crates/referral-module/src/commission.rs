use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use genealogy_core::money;
use genealogy_core::{
    CommissionSchedule, CommissionTransaction, CoreError, EntryKind, Investment, LedgerEntry, User,
};
use ledger_store::{LedgerWrite, StoreError};

pub struct CommissionEngine<'a> {
    schedule: &'a CommissionSchedule,
}

impl<'a> CommissionEngine<'a> {
    pub fn new(schedule: &'a CommissionSchedule) -> Self {
        Self { schedule }
    }

    /// One row per compensated ancestor in `chain` (nearest first).
    pub fn calculate(
        &self,
        investment: &Investment,
        chain: &[User],
        now: DateTime<Utc>,
    ) -> Vec<CommissionTransaction> {
        if investment.amount <= Decimal::ZERO {
            return vec![];
        }
        let mut rows = Vec::new();
        for (idx, ancestor) in chain.iter().enumerate().take(self.schedule.levels()) {
            let level = idx + 1;
            let (Some(rate), Some(amount)) = (
                self.schedule.rate(level),
                self.schedule.commission(level, investment.amount),
            ) else {
                continue;
            };
            rows.push(CommissionTransaction {
                id: Uuid::new_v4(),
                investment_id: investment.id,
                beneficiary_id: ancestor.id,
                source_user_id: investment.user_id,
                level: level as u8,
                rate,
                amount,
                created_at: now,
            });
        }
        rows
    }

    /// Write commission rows for `investment` and credit each beneficiary.
    ///
    /// Must run inside the transaction that creates the investment. Returns
    /// the rows written; empty if the investment already had commissions.
    pub fn distribute(
        &self,
        tx: &mut dyn LedgerWrite,
        investment: &Investment,
        now: DateTime<Utc>,
    ) -> Result<Vec<CommissionTransaction>, StoreError> {
        if !tx.commissions_for(&investment.id)?.is_empty() {
            let duplicate = CoreError::DuplicateCommission(investment.id.to_string());
            debug!(%duplicate, "no-op");
            return Ok(Vec::new());
        }

        let chain = tx.sponsor_chain(&investment.user_id, self.schedule.levels())?;
        let rows = self.calculate(investment, &chain, now);
        if rows.is_empty() {
            return Ok(rows);
        }

        tx.insert_commissions(&rows)?;
        for row in &rows {
            tx.post_entry(&LedgerEntry::credit(
                row.beneficiary_id,
                EntryKind::Commission,
                row.amount,
                Some(format!("investment:{}:L{}", investment.id, row.level)),
                now,
            ))?;
        }

        let total = money::checked_sum(rows.iter().map(|r| r.amount))?;
        info!(
            investment = %investment.id,
            levels = rows.len(),
            %total,
            "commissions distributed"
        );
        Ok(rows)
    }
}

pub fn distribute_commissions(
    tx: &mut dyn LedgerWrite,
    schedule: &CommissionSchedule,
    investment: &Investment,
    now: DateTime<Utc>,
) -> Result<Vec<CommissionTransaction>, StoreError> {
    CommissionEngine::new(schedule).distribute(tx, investment, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use genealogy_core::Plan;
    use ledger_store::{LedgerRead, LedgerStore, MemoryLedger, SqliteLedger};

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
    }

    fn plan() -> Plan {
        Plan {
            id: "starter".into(),
            name: "Starter".into(),
            monthly_rate: d("0.05"),
            duration_months: 6,
            min_amount: Decimal::ONE,
            max_amount: None,
        }
    }

    /// Chain of `len + 1` users; the last one is the investor.
    fn chain<S: LedgerStore>(store: &S, len: usize) -> Vec<User> {
        let mut users: Vec<User> = Vec::new();
        for i in 0..=len {
            let user = User::new(
                format!("u{i}"),
                users.last().map(|u| u.id),
                t0() + Duration::minutes(i as i64),
            );
            users.push(user);
        }
        store
            .transaction(|tx| {
                tx.upsert_plan(&plan())?;
                users.iter().try_for_each(|u| tx.insert_user(u))
            })
            .unwrap();
        users
    }

    fn invest<S: LedgerStore>(
        store: &S,
        schedule: &CommissionSchedule,
        investor: &User,
        amount: Decimal,
    ) -> (Investment, Vec<CommissionTransaction>) {
        let investment = Investment::open(investor.id, &plan(), amount, t0()).unwrap();
        let rows = store
            .transaction(|tx| {
                tx.insert_investment(&investment)?;
                distribute_commissions(tx, schedule, &investment, t0())
            })
            .unwrap();
        (investment, rows)
    }

    #[test]
    fn row_count_is_min_of_chain_and_five() {
        let schedule = CommissionSchedule::default();
        let expected = [d("0.10"), d("0.05"), d("0.03"), d("0.02"), d("0.01")];
        let amount = d("1234.56");
        for len in 0..=10 {
            let store = MemoryLedger::new();
            let users = chain(&store, len);
            let investor = users.last().unwrap();
            let (_, rows) = invest(&store, &schedule, investor, amount);

            assert_eq!(rows.len(), len.min(5), "chain length {len}");
            for row in &rows {
                let idx = row.level as usize - 1;
                assert_eq!(row.rate, expected[idx]);
                assert_eq!(
                    row.amount,
                    (amount * expected[idx]).round_dp_with_strategy(
                        2,
                        rust_decimal::RoundingStrategy::MidpointNearestEven
                    )
                );
                // nearest ancestor is level 1
                assert_eq!(row.beneficiary_id, users[len - idx - 1].id);
                assert_eq!(row.source_user_id, investor.id);
            }
        }
    }

    #[test]
    fn three_member_chain_pays_two_levels() {
        let store = MemoryLedger::new();
        let users = chain(&store, 2);
        let (a, b, c) = (&users[0], &users[1], &users[2]);
        let (_, rows) = invest(&store, &CommissionSchedule::default(), c, d("1000"));

        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].beneficiary_id, rows[0].level), (b.id, 1));
        assert_eq!(rows[0].amount, d("100"));
        assert_eq!((rows[1].beneficiary_id, rows[1].level), (a.id, 2));
        assert_eq!(rows[1].amount, d("50"));
        assert_eq!(store.balance(&b.id).unwrap(), d("100"));
        assert_eq!(store.balance(&a.id).unwrap(), d("50"));
    }

    #[test]
    fn second_distribution_is_a_no_op() {
        let store = MemoryLedger::new();
        let users = chain(&store, 3);
        let schedule = CommissionSchedule::default();
        let (investment, first) = invest(&store, &schedule, &users[3], d("200"));
        assert_eq!(first.len(), 3);

        let again = store
            .transaction(|tx| distribute_commissions(tx, &schedule, &investment, t0()))
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(store.commissions_for(&investment.id).unwrap().len(), 3);
        assert_eq!(store.balance(&users[2].id).unwrap(), d("20"));
    }

    #[test]
    fn failure_after_distribution_rolls_back_everything() {
        let store = SqliteLedger::open_in_memory().unwrap();
        let users = chain(&store, 2);
        let investment = Investment::open(users[2].id, &plan(), d("1000"), t0()).unwrap();

        let result: Result<(), StoreError> = store.transaction(|tx| {
            tx.insert_investment(&investment)?;
            distribute_commissions(tx, &CommissionSchedule::default(), &investment, t0())?;
            Err(StoreError::Internal("payment adapter rejected".into()))
        });
        assert!(result.is_err());
        assert!(store.get_investment(&investment.id).unwrap_err().is_not_found());
        assert!(store.commissions_for(&investment.id).unwrap().is_empty());
        assert_eq!(store.balance(&users[1].id).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn rounding_happens_on_the_final_amount() {
        let store = MemoryLedger::new();
        let users = chain(&store, 5);
        let (_, rows) = invest(&store, &CommissionSchedule::default(), &users[5], d("0.25"));
        // 0.025 -> 0.02, 0.0125 -> 0.01, 0.0075 -> 0.01, 0.005 -> 0.00, 0.0025 -> 0.00
        let amounts: Vec<Decimal> = rows.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![d("0.02"), d("0.01"), d("0.01"), d("0"), d("0")]);
    }

    #[test]
    fn minimum_payout_skips_small_levels() {
        let store = MemoryLedger::new();
        let users = chain(&store, 5);
        let schedule = CommissionSchedule::new(vec![1_000, 500, 300, 200, 100], d("2.00")).unwrap();
        let (_, rows) = invest(&store, &schedule, &users[5], d("100"));
        let levels: Vec<u8> = rows.iter().map(|r| r.level).collect();
        assert_eq!(levels, vec![1, 2, 3, 4]);
    }
}
