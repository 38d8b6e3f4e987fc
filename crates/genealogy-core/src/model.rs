use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

pub type UserId = Uuid;
pub type InvestmentId = Uuid;
pub type PlanId = String;

pub const REFERRAL_CODE_LEN: usize = 8;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub referral_code: String,
    /// Upward pointer only; recruits are derived by querying on this field.
    pub sponsor_id: Option<UserId>,
    pub registered_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        display_name: impl Into<String>,
        sponsor_id: Option<UserId>,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            referral_code: generate_referral_code(&mut rand::thread_rng()),
            sponsor_id,
            registered_at,
        }
    }
}

/// Uppercase alphanumeric code handed out for recruiting.
pub fn generate_referral_code<R: Rng>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LEN)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    /// Fraction paid per month, e.g. `0.05` for 5%.
    pub monthly_rate: Decimal,
    pub duration_months: u32,
    pub min_amount: Decimal,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
}

impl Plan {
    pub fn accepts(&self, amount: Decimal) -> bool {
        if amount < self.min_amount {
            return false;
        }
        match self.max_amount {
            Some(max) => amount <= max,
            None => true,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Active,
    Completed,
    Terminated,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStatus::Active => "active",
            InvestmentStatus::Completed => "completed",
            InvestmentStatus::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvestmentStatus::Active)
    }
}

impl fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvestmentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(InvestmentStatus::Active),
            "completed" => Ok(InvestmentStatus::Completed),
            "terminated" => Ok(InvestmentStatus::Terminated),
            other => Err(CoreError::unrecognized("investment status", other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Investment {
    pub id: InvestmentId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub amount: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: InvestmentStatus,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommissionTransaction {
    pub id: Uuid,
    pub investment_id: InvestmentId,
    /// Ancestor credited with the commission.
    pub beneficiary_id: UserId,
    /// The investing user.
    pub source_user_id: UserId,
    pub level: u8,
    pub rate: Decimal,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Paypal,
    Pesapal,
    Crypto,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Paypal => "paypal",
            PaymentProvider::Pesapal => "pesapal",
            PaymentProvider::Crypto => "crypto",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paypal" => Ok(PaymentProvider::Paypal),
            "pesapal" => Ok(PaymentProvider::Pesapal),
            "crypto" => Ok(PaymentProvider::Crypto),
            other => Err(CoreError::unrecognized("payment provider", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    Investment,
    Commission,
    Return,
    Refund,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "deposit",
            EntryKind::Withdrawal => "withdrawal",
            EntryKind::Investment => "investment",
            EntryKind::Commission => "commission",
            EntryKind::Return => "return",
            EntryKind::Refund => "refund",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(EntryKind::Deposit),
            "withdrawal" => Ok(EntryKind::Withdrawal),
            "investment" => Ok(EntryKind::Investment),
            "commission" => Ok(EntryKind::Commission),
            "return" => Ok(EntryKind::Return),
            "refund" => Ok(EntryKind::Refund),
            other => Err(CoreError::unrecognized("entry kind", other)),
        }
    }
}

/// Signed wallet movement. Credits are positive, debits negative.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: EntryKind,
    pub amount: Decimal,
    #[serde(default)]
    pub provider: Option<PaymentProvider>,
    #[serde(default)]
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn credit(
        user_id: UserId,
        kind: EntryKind,
        amount: Decimal,
        reference: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            provider: None,
            reference,
            created_at,
        }
    }

    pub fn debit(
        user_id: UserId,
        kind: EntryKind,
        amount: Decimal,
        reference: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::credit(user_id, kind, -amount, reference, created_at)
    }

    pub fn with_provider(mut self, provider: PaymentProvider) -> Self {
        self.provider = Some(provider);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn referral_codes_are_uppercase_alphanumeric() {
        let mut rng = StdRng::seed_from_u64(7);
        let code = generate_referral_code(&mut rng);
        assert_eq!(code.len(), REFERRAL_CODE_LEN);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn plan_bounds_are_inclusive() {
        let plan = Plan {
            id: "starter".into(),
            name: "Starter".into(),
            monthly_rate: Decimal::new(5, 2),
            duration_months: 6,
            min_amount: Decimal::new(50, 0),
            max_amount: Some(Decimal::new(5_000, 0)),
        };
        assert!(plan.accepts(Decimal::new(50, 0)));
        assert!(plan.accepts(Decimal::new(5_000, 0)));
        assert!(!plan.accepts(Decimal::new(4_999, 2)));
        assert!(!plan.accepts(Decimal::new(500_001, 2)));
    }

    #[test]
    fn status_and_kind_names_round_trip_through_strings() {
        for status in [
            InvestmentStatus::Active,
            InvestmentStatus::Completed,
            InvestmentStatus::Terminated,
        ] {
            assert_eq!(status.as_str().parse::<InvestmentStatus>().unwrap(), status);
        }
        assert_eq!("PayPal".parse::<PaymentProvider>().unwrap(), PaymentProvider::Paypal);
        assert_eq!(
            "wire".parse::<PaymentProvider>().unwrap_err(),
            CoreError::unrecognized("payment provider", "wire")
        );
        assert!(matches!(
            "paused".parse::<InvestmentStatus>(),
            Err(CoreError::Unrecognized { kind: "investment status", .. })
        ));
        assert_eq!("refund".parse::<EntryKind>().unwrap(), EntryKind::Refund);
    }

    #[test]
    fn debit_entries_are_negative() {
        let entry = LedgerEntry::debit(
            Uuid::new_v4(),
            EntryKind::Withdrawal,
            Decimal::new(1_250, 2),
            None,
            Utc::now(),
        )
        .with_provider(PaymentProvider::Crypto);
        assert_eq!(entry.amount, Decimal::new(-1_250, 2));
        assert_eq!(entry.provider, Some(PaymentProvider::Crypto));
    }
}
