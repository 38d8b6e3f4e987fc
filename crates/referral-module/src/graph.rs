use std::collections::BTreeSet;

use tracing::{debug, warn};

use genealogy_core::{TreeNode, User, UserId};
use ledger_store::{LedgerRead, StoreError};

/// Matches the number of compensated commission levels.
pub const DEFAULT_MAX_DEPTH: u32 = 5;

/// Build the downline of `root` down to `max_depth` levels below it.
///
/// Children are ordered by registration time. Members deeper than
/// `max_depth` are left out. Fails with `NotFound` if `root` is unknown.
pub fn build_tree<R>(store: &R, root: &UserId, max_depth: u32) -> Result<TreeNode, StoreError>
where
    R: LedgerRead + ?Sized,
{
    let user = store.get_user(root)?;
    let mut path = BTreeSet::new();
    let tree = expand(store, user, 0, max_depth, &mut path)?;
    debug!(root = %root, max_depth, members = tree.size(), "built genealogy tree");
    Ok(tree)
}

fn expand<R>(
    store: &R,
    user: User,
    level: u32,
    max_depth: u32,
    path: &mut BTreeSet<UserId>,
) -> Result<TreeNode, StoreError>
where
    R: LedgerRead + ?Sized,
{
    let is_active = store.has_active_investment(&user.id)?;
    let mut node = TreeNode::leaf(user.id, user.display_name, level, is_active);
    if level >= max_depth {
        return Ok(node);
    }

    path.insert(user.id);
    for recruit in store.recruits_of(&user.id)? {
        if path.contains(&recruit.id) {
            warn!(user = %recruit.id, "recruit already on the current path, skipping");
            continue;
        }
        node.children
            .push(expand(store, recruit, level + 1, max_depth, path)?);
    }
    path.remove(&user.id);

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use genealogy_core::{Investment, Plan};
    use ledger_store::{LedgerStore, LedgerWrite, MemoryLedger};
    use rust_decimal::Decimal;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
    }

    fn plan() -> Plan {
        Plan {
            id: "starter".into(),
            name: "Starter".into(),
            monthly_rate: "0.05".parse().unwrap(),
            duration_months: 6,
            min_amount: Decimal::ONE,
            max_amount: None,
        }
    }

    fn register(ledger: &MemoryLedger, name: &str, sponsor: Option<&User>, minute: i64) -> User {
        let user = User::new(name, sponsor.map(|s| s.id), t0() + Duration::minutes(minute));
        ledger.transaction(|tx| tx.insert_user(&user)).unwrap();
        user
    }

    fn assert_levels(node: &TreeNode) {
        for child in &node.children {
            assert_eq!(child.level, node.level + 1);
            assert_levels(child);
        }
    }

    #[test]
    fn user_without_recruits_is_a_single_root() {
        let ledger = MemoryLedger::new();
        let solo = register(&ledger, "solo", None, 0);
        let tree = build_tree(&ledger, &solo.id, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(tree.level, 0);
        assert!(tree.children.is_empty());
        assert!(!tree.is_active);
    }

    #[test]
    fn unknown_root_is_not_found() {
        let ledger = MemoryLedger::new();
        let err = build_tree(&ledger, &uuid::Uuid::new_v4(), 3).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn children_follow_registration_order_and_activity() {
        let ledger = MemoryLedger::new();
        let root = register(&ledger, "root", None, 0);
        let second = register(&ledger, "second", Some(&root), 20);
        let first = register(&ledger, "first", Some(&root), 10);
        register(&ledger, "grandchild", Some(&first), 30);

        let investment = Investment::open(second.id, &plan(), Decimal::new(10, 0), t0()).unwrap();
        ledger
            .transaction(|tx| {
                tx.upsert_plan(&plan())?;
                tx.insert_investment(&investment)
            })
            .unwrap();

        let tree = build_tree(&ledger, &root.id, DEFAULT_MAX_DEPTH).unwrap();
        let names: Vec<&str> = tree
            .children
            .iter()
            .map(|c| c.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(!tree.children[0].is_active);
        assert!(tree.children[1].is_active);
        assert_eq!(tree.children[0].children[0].display_name, "grandchild");
        assert_levels(&tree);
    }

    #[test]
    fn depth_bound_cuts_deeper_members() {
        let ledger = MemoryLedger::new();
        let root = register(&ledger, "u0", None, 0);
        let mut last = root.clone();
        for i in 1..=7 {
            last = register(&ledger, &format!("u{i}"), Some(&last), i);
        }

        let tree = build_tree(&ledger, &root.id, 3).unwrap();
        assert_eq!(tree.depth(), 3);
        assert!(tree.walk().iter().all(|n| n.level <= 3));
        assert_eq!(tree.size(), 4);
        assert_levels(&tree);

        let flat = build_tree(&ledger, &root.id, 0).unwrap();
        assert!(flat.children.is_empty());
    }

    /// Store stub whose sponsor data loops: a -> b -> a.
    struct LoopingStore {
        inner: MemoryLedger,
        a: User,
        b: User,
    }

    impl LedgerRead for LoopingStore {
        fn get_user(&self, id: &UserId) -> Result<User, StoreError> {
            self.inner.get_user(id)
        }
        fn find_user_by_code(&self, code: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_user_by_code(code)
        }
        fn recruits_of(&self, sponsor: &UserId) -> Result<Vec<User>, StoreError> {
            if sponsor == &self.a.id {
                Ok(vec![self.b.clone()])
            } else if sponsor == &self.b.id {
                Ok(vec![self.a.clone()])
            } else {
                Ok(vec![])
            }
        }
        fn get_plan(&self, id: &str) -> Result<Plan, StoreError> {
            self.inner.get_plan(id)
        }
        fn plans(&self) -> Result<Vec<Plan>, StoreError> {
            self.inner.plans()
        }
        fn get_investment(&self, id: &uuid::Uuid) -> Result<Investment, StoreError> {
            self.inner.get_investment(id)
        }
        fn investments_of(&self, user: &UserId) -> Result<Vec<Investment>, StoreError> {
            self.inner.investments_of(user)
        }
        fn due_investments(&self, now: DateTime<Utc>) -> Result<Vec<Investment>, StoreError> {
            self.inner.due_investments(now)
        }
        fn has_active_investment(&self, user: &UserId) -> Result<bool, StoreError> {
            self.inner.has_active_investment(user)
        }
        fn commissions_for(
            &self,
            investment: &uuid::Uuid,
        ) -> Result<Vec<genealogy_core::CommissionTransaction>, StoreError> {
            self.inner.commissions_for(investment)
        }
        fn commissions_earned_by(
            &self,
            user: &UserId,
        ) -> Result<Vec<genealogy_core::CommissionTransaction>, StoreError> {
            self.inner.commissions_earned_by(user)
        }
        fn entries_of(&self, user: &UserId) -> Result<Vec<genealogy_core::LedgerEntry>, StoreError> {
            self.inner.entries_of(user)
        }
        fn balances(
            &self,
        ) -> Result<std::collections::BTreeMap<UserId, Decimal>, StoreError> {
            self.inner.balances()
        }
        fn entry_by_reference(
            &self,
            provider: genealogy_core::PaymentProvider,
            reference: &str,
        ) -> Result<Option<genealogy_core::LedgerEntry>, StoreError> {
            self.inner.entry_by_reference(provider, reference)
        }
    }

    #[test]
    fn cyclic_data_terminates() {
        let inner = MemoryLedger::new();
        let a = register(&inner, "a", None, 0);
        let b = register(&inner, "b", Some(&a), 1);
        let store = LoopingStore { inner, a: a.clone(), b };

        let tree = build_tree(&store, &a.id, 10).unwrap();
        assert_eq!(tree.size(), 2);
        assert!(tree.children[0].children.is_empty());
    }
}
