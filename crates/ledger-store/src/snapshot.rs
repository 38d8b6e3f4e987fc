use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use genealogy_core::{money, UserId};

use crate::{LedgerRead, StoreError};

/// Point-in-time wallet balances with a digest for reconciliation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub balances: BTreeMap<UserId, Decimal>,
    pub total: Decimal,
    #[serde(with = "hex_digest")]
    pub merkle_root: [u8; 32],
}

impl LedgerSnapshot {
    pub fn capture<R>(store: &R, taken_at: DateTime<Utc>) -> Result<Self, StoreError>
    where
        R: LedgerRead + ?Sized,
    {
        let balances = store.balances()?;
        let total = money::checked_sum(balances.values().copied())?;
        let merkle_root = compute_merkle_root(&balances);
        Ok(Self {
            taken_at,
            balances,
            total,
            merkle_root,
        })
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.merkle_root)
    }

    /// Recompute the digest over the recorded balances.
    pub fn verify(&self) -> bool {
        compute_merkle_root(&self.balances) == self.merkle_root
    }
}

const EMPTY_LEDGER: &[u8] = b"genealogy-ledger-empty";

/// Digest over `(user, balance)` pairs in key order. An unpaired node is
/// carried up a level unchanged; the root also binds the leaf count.
fn compute_merkle_root(balances: &BTreeMap<UserId, Decimal>) -> [u8; 32] {
    let mut level: Vec<[u8; 32]> = balances
        .iter()
        .map(|(user, balance)| balance_leaf(user, balance))
        .collect();
    let leaf_count = level.len() as u64;
    if level.is_empty() {
        return Sha256::digest(EMPTY_LEDGER).into();
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_parts(&[b"node", left, right]),
                _ => pair[0],
            })
            .collect();
    }
    hash_parts(&[b"root", &leaf_count.to_be_bytes(), &level[0]])
}

fn balance_leaf(user: &UserId, balance: &Decimal) -> [u8; 32] {
    hash_parts(&[
        b"wallet",
        user.as_bytes(),
        balance.normalize().to_string().as_bytes(),
    ])
}

fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    parts
        .iter()
        .fold(Sha256::new(), |hasher, part| hasher.chain_update(part))
        .finalize()
        .into()
}

mod hex_digest {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("digest must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LedgerStore, MemoryLedger};
    use chrono::TimeZone;
    use genealogy_core::{EntryKind, LedgerEntry, User};

    fn ledger_with_balances(amounts: &[&str]) -> MemoryLedger {
        let ledger = MemoryLedger::new();
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        ledger
            .transaction(|tx| {
                for (i, amount) in amounts.iter().enumerate() {
                    let user = User::new(format!("user-{i}"), None, t0);
                    tx.insert_user(&user)?;
                    tx.post_entry(&LedgerEntry::credit(
                        user.id,
                        EntryKind::Deposit,
                        amount.parse().unwrap(),
                        None,
                        t0,
                    ))?;
                }
                Ok(())
            })
            .unwrap();
        ledger
    }

    #[test]
    fn merkle_root_is_deterministic() {
        let ledger = ledger_with_balances(&["10.00", "20.50", "7"]);
        let now = Utc::now();
        let a = LedgerSnapshot::capture(&ledger, now).unwrap();
        let b = LedgerSnapshot::capture(&ledger, now).unwrap();
        assert_eq!(a.merkle_root, b.merkle_root);
        assert_eq!(a.total, "37.50".parse::<Decimal>().unwrap());
        assert!(a.verify());
    }

    #[test]
    fn tampered_balance_fails_verification() {
        let ledger = ledger_with_balances(&["10.00", "20.50"]);
        let mut snapshot = LedgerSnapshot::capture(&ledger, Utc::now()).unwrap();
        let first = *snapshot.balances.keys().next().unwrap();
        snapshot.balances.insert(first, Decimal::new(1_000_000, 2));
        assert!(!snapshot.verify());
    }

    #[test]
    fn every_balance_moves_the_root() {
        let three = ledger_with_balances(&["1", "2", "3"]);
        let snapshot = LedgerSnapshot::capture(&three, Utc::now()).unwrap();
        for user in snapshot.balances.keys() {
            let mut tampered = snapshot.clone();
            tampered.balances.insert(*user, Decimal::new(4, 0));
            assert!(!tampered.verify());
        }
        let empty = LedgerSnapshot::capture(&MemoryLedger::new(), Utc::now()).unwrap();
        assert_ne!(empty.merkle_root, snapshot.merkle_root);
        assert_eq!(empty.total, Decimal::ZERO);
    }

    #[test]
    fn overflowing_total_fails_capture() {
        let ledger = ledger_with_balances(&[
            "50000000000000000000000000000",
            "50000000000000000000000000000",
        ]);
        let err = LedgerSnapshot::capture(&ledger, Utc::now()).unwrap_err();
        assert!(matches!(
            err.domain(),
            Some(genealogy_core::CoreError::InvalidAmount(_))
        ));
    }

    #[test]
    fn digest_serializes_as_hex() {
        let ledger = ledger_with_balances(&[]);
        let snapshot = LedgerSnapshot::capture(&ledger, Utc::now()).unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains(&snapshot.root_hex()));
        let back: LedgerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.merkle_root, snapshot.merkle_root);
    }
}
